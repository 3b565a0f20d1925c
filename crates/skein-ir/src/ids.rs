use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// `0` is never handed out; it is reserved for [`OperationId::EPSILON`].
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Next value of the process-wide identifier counter.
pub fn fresh_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub fn fresh() -> Self {
                Self(fresh_id())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// A control location within a transition relation.
    LocationId,
    "L"
);
id_type!(
    /// A transition relation registered with the program model.
    RelationId,
    "R"
);
id_type!(
    /// A registered program operation.
    OperationId,
    "op"
);
id_type!(ThreadId, "T");
id_type!(ScriptId, "S");

impl OperationId {
    /// The operation that does nothing.
    pub const EPSILON: OperationId = OperationId(0);
}

/// Actors are identified by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(name: impl Into<String>) -> Self {
        ActorId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct_and_never_epsilon() {
        let a = OperationId::fresh();
        let b = OperationId::fresh();
        assert_ne!(a, b);
        assert_ne!(a, OperationId::EPSILON);
        assert_ne!(b, OperationId::EPSILON);
    }

    #[test]
    fn display_uses_kind_prefix() {
        assert_eq!(LocationId(7).to_string(), "L7");
        assert_eq!(OperationId::EPSILON.to_string(), "op0");
        assert_eq!(ActorId::new("Stage").to_string(), "Stage");
    }
}
