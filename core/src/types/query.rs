use nutype::nutype;

pub const MAX_QUERY_LENGTH: usize = 1024;
pub const MAX_HASH_LENGTH: usize = 256;

/// A search string the user typed, as recorded in history.
///
/// Unlike keys elsewhere, queries are stored verbatim: surrounding whitespace is
/// part of what the user typed and participates in prefix matching.
#[nutype(
    validate(not_empty, len_char_max = MAX_QUERY_LENGTH),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        AsRef,
        Deref,
        Into,
        Hash,
        Borrow,
        Display,
        Serialize,
        Deserialize,
    )
)]
pub struct QueryString(String);

/// Content hash identifying the result a query resolved to.
#[nutype(
    validate(not_empty, len_char_max = MAX_HASH_LENGTH),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        AsRef,
        Deref,
        Into,
        Hash,
        Borrow,
        Display,
        Serialize,
        Deserialize,
    )
)]
pub struct MatchHash(String);
