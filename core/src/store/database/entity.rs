//! Versioned on-disk encoding of store entities.

use crate::types::{EntityId, EntityKind};
use redb::TypeName;
use serde::{Deserialize, Serialize};

pub(crate) use v1 as latest_entity;

pub(crate) trait EntityVariant {
    const VERSION: u8;
}

#[derive(Debug, Clone)]
pub(crate) enum VersionedEntity {
    V1(v1::Entity),
}

impl VersionedEntity {
    pub(crate) fn into_latest(self) -> latest_entity::Entity {
        match self {
            VersionedEntity::V1(entity) => entity,
        }
    }
}

impl redb::Value for VersionedEntity {
    type SelfType<'a> = VersionedEntity;
    type AsBytes<'a> = Vec<u8>;

    fn fixed_width() -> Option<usize> {
        None
    }

    fn from_bytes<'a>(data: &'a [u8]) -> Self::SelfType<'a>
    where
        Self: 'a,
    {
        let (version, data) = data.split_first().expect("empty data");
        match *version {
            v1::Entity::VERSION => {
                let v1 = postcard::from_bytes::<v1::Entity>(data).expect("invalid entity");
                VersionedEntity::V1(v1)
            }
            version => panic!("unsupported version: {}", version),
        }
    }

    fn as_bytes<'a, 'b: 'a>(value: &'a Self::SelfType<'b>) -> Self::AsBytes<'a>
    where
        Self: 'b,
    {
        match value {
            VersionedEntity::V1(v1) => {
                postcard::to_extend(v1, vec![v1::Entity::VERSION]).expect("entity encoding")
            }
        }
    }

    fn type_name() -> TypeName {
        TypeName::new("qhist::Entity")
    }
}

pub(crate) mod v1 {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) enum Entity {
        Query(QueryEntity),
        Selection(SelectionEntity),
        Match(MatchEntity),
    }

    impl EntityVariant for Entity {
        const VERSION: u8 = 1;
    }

    impl Entity {
        pub(crate) fn kind(&self) -> EntityKind {
            match self {
                Entity::Query(_) => EntityKind::Query,
                Entity::Selection(_) => EntityKind::Selection,
                Entity::Match(_) => EntityKind::Match,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) struct QueryEntity {
        pub(crate) query_string: String,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) struct SelectionEntity {
        pub(crate) selection_date: String,
        pub(crate) matched: Option<EntityId>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) struct MatchEntity {
        pub(crate) hash: String,
    }
}
