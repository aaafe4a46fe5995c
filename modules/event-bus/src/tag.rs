//! Per-type routing tags

use std::any::{type_name, TypeId};
use std::fmt;

/// A stable identifier for the static type of an emitted value.
///
/// Emits are routed to subscribers whose tag equals the emitted tag, or whose
/// tag is [`TypeTag::UNIVERSAL`], which matches every emitted type on the
/// subscriber side. The displayed type name is carried alongside the id for
/// diagnostics only; equality is decided by the id.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: Option<TypeId>,
    name: &'static str,
}

impl TypeTag {
    /// The reserved tag that matches any emitted type.
    pub const UNIVERSAL: TypeTag = TypeTag {
        id: None,
        name: "<universal>",
    };

    /// The tag for a concrete static type.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: Some(TypeId::of::<T>()),
            name: type_name::<T>(),
        }
    }

    pub fn is_universal(&self) -> bool {
        self.id.is_none()
    }

    /// Whether a subscriber holding this tag accepts a value emitted with
    /// `emitted`. Universal subscribers accept everything.
    pub fn accepts(&self, emitted: &TypeTag) -> bool {
        self.is_universal() || self.id == emitted.id
    }

    /// The displayed name of the tagged type.
    pub fn type_name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_type_yields_equal_tags() {
        assert_eq!(TypeTag::of::<u32>(), TypeTag::of::<u32>());
        assert_eq!(TypeTag::of::<String>(), TypeTag::of::<String>());
    }

    #[test]
    fn distinct_types_yield_distinct_tags() {
        assert_ne!(TypeTag::of::<u32>(), TypeTag::of::<u64>());
        assert_ne!(TypeTag::of::<f64>(), TypeTag::of::<bool>());
    }

    #[test]
    fn universal_accepts_every_tag() {
        assert!(TypeTag::UNIVERSAL.accepts(&TypeTag::of::<u32>()));
        assert!(TypeTag::UNIVERSAL.accepts(&TypeTag::of::<String>()));
        assert!(TypeTag::UNIVERSAL.accepts(&TypeTag::UNIVERSAL));
    }

    #[test]
    fn concrete_tag_accepts_only_itself() {
        let tag = TypeTag::of::<bool>();
        assert!(tag.accepts(&TypeTag::of::<bool>()));
        assert!(!tag.accepts(&TypeTag::of::<u32>()));
    }

    #[test]
    fn tag_carries_displayed_name() {
        assert!(TypeTag::of::<u32>().type_name().contains("u32"));
        assert_eq!(TypeTag::UNIVERSAL.type_name(), "<universal>");
    }
}
