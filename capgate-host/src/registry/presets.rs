//! Ready-made registry tables
//!
//! [`RegistryPresets::standard`] exposes the core builtins, the `str`,
//! `list` and `dict` value types and a handful of modules. Hosts usually
//! start from [`RegistryPresets::standard_builder`] and add their own types.

use super::{AccessRegistry, RegistryBuilder};
use capgate_api::{FunctionDecl, MemberDecl, ModuleDecl, TypeDecl};

/// Builtins every script may call
pub const STANDARD_BUILTINS: &[FunctionDecl] = &[
    FunctionDecl::new("print", "Write values to the host output"),
    FunctionDecl::new("len", "Length of a str, list or dict"),
    FunctionDecl::new("range", "Integer sequence"),
    FunctionDecl::new("str", "Convert to str"),
    FunctionDecl::new("int", "Convert to int"),
    FunctionDecl::new("float", "Convert to float"),
    FunctionDecl::new("bool", "Truthiness"),
    FunctionDecl::new("list", "Build a list"),
    FunctionDecl::new("dict", "Build a dict"),
    FunctionDecl::new("sorted", "Sorted copy of a list"),
    FunctionDecl::new("min", "Smallest item"),
    FunctionDecl::new("max", "Largest item"),
    FunctionDecl::new("abs", "Absolute value"),
    FunctionDecl::new("sum", "Sum of numbers"),
    FunctionDecl::new("round", "Round a number"),
    FunctionDecl::new("enumerate", "Index/value pairs"),
    FunctionDecl::new("zip", "Pair up items"),
    FunctionDecl::new("map", "Apply a callable to each item (guarded)"),
    FunctionDecl::new("filter", "Keep items a callable accepts (guarded)"),
    FunctionDecl::new("call", "Invoke a callable value (guarded)"),
    FunctionDecl::new("has_capability", "Whether a capability is currently held"),
    FunctionDecl::new("list_capabilities", "Currently held capabilities"),
    FunctionDecl::new("capability_info", "Constraints of a capability"),
];

pub const STR_TYPE: TypeDecl = TypeDecl {
    type_name: "str",
    members: &[
        MemberDecl::method("upper", "Uppercase copy"),
        MemberDecl::method("lower", "Lowercase copy"),
        MemberDecl::method("strip", "Trim whitespace"),
        MemberDecl::method("split", "Split on a separator"),
        MemberDecl::method("join", "Join a list with this separator"),
        MemberDecl::method("replace", "Replace occurrences"),
        MemberDecl::method("startswith", "Prefix test"),
        MemberDecl::method("endswith", "Suffix test"),
        MemberDecl::method("find", "Index of a substring"),
        MemberDecl::forbidden("format", "Field lookups reach object attributes"),
        MemberDecl::forbidden("format_map", "Field lookups reach object attributes"),
    ],
};

pub const LIST_TYPE: TypeDecl = TypeDecl {
    type_name: "list",
    members: &[
        MemberDecl::method("append", "Append an item"),
        MemberDecl::method("extend", "Append every item of a list"),
        MemberDecl::method("pop", "Remove and return the last item"),
        MemberDecl::method("index", "Position of an item"),
        MemberDecl::method("count", "Occurrences of an item"),
        MemberDecl::method("reverse", "Reverse in place"),
        MemberDecl::method("sort", "Sort in place"),
    ],
};

pub const DICT_TYPE: TypeDecl = TypeDecl {
    type_name: "dict",
    members: &[
        MemberDecl::method("get", "Value for a key, or a default"),
        MemberDecl::method("keys", "List of keys"),
        MemberDecl::method("values", "List of values"),
        MemberDecl::method("items", "List of key/value pairs"),
    ],
};

pub const MATH_MODULE: ModuleDecl = ModuleDecl {
    module_name: "math",
    exports: &[
        FunctionDecl::new("sqrt", "Square root"),
        FunctionDecl::new("floor", "Round down"),
        FunctionDecl::new("ceil", "Round up"),
        FunctionDecl::new("pow", "Exponentiation"),
    ],
};

pub const JSON_MODULE: ModuleDecl = ModuleDecl {
    module_name: "json",
    exports: &[
        FunctionDecl::new("dumps", "Serialize a value to JSON text"),
        FunctionDecl::new("loads", "Parse JSON text"),
    ],
};

pub const TEXT_MODULE: ModuleDecl = ModuleDecl {
    module_name: "text",
    exports: &[
        FunctionDecl::new("wrap", "Wrap text to a width"),
        FunctionDecl::new("dedent", "Remove common indentation"),
    ],
};

pub const FS_MODULE: ModuleDecl = ModuleDecl {
    module_name: "fs",
    exports: &[
        FunctionDecl::new("read_text", "Read a file").requiring(&["file.read"]),
        FunctionDecl::new("exists", "Whether a path exists").requiring(&["file.read"]),
        FunctionDecl::new("write_text", "Write a file").requiring(&["file.write"]),
    ],
};

pub const HTTP_MODULE: ModuleDecl = ModuleDecl {
    module_name: "http",
    exports: &[
        FunctionDecl::new("get", "HTTP GET").requiring(&["net.http"]),
        FunctionDecl::new("post", "HTTP POST").requiring(&["net.http"]),
    ],
};

pub struct RegistryPresets;

impl RegistryPresets {
    /// Builder holding the standard tables
    pub fn standard_builder() -> RegistryBuilder {
        RegistryBuilder::new()
            .declare_builtins(STANDARD_BUILTINS)
            .declare_type(&STR_TYPE)
            .declare_type(&LIST_TYPE)
            .declare_type(&DICT_TYPE)
            .map_attribute("length", "len", &["str", "list", "dict"])
            .declare_module(&MATH_MODULE)
            .declare_module(&JSON_MODULE)
            .declare_module(&TEXT_MODULE)
            .declare_module(&FS_MODULE)
            .declare_module(&HTTP_MODULE)
    }

    pub fn standard() -> AccessRegistry {
        Self::standard_builder().build()
    }

    /// Builtins and value types only; no modules
    pub fn minimal() -> AccessRegistry {
        RegistryBuilder::new()
            .declare_builtins(STANDARD_BUILTINS)
            .declare_type(&STR_TYPE)
            .declare_type(&LIST_TYPE)
            .declare_type(&DICT_TYPE)
            .map_attribute("length", "len", &["str", "list", "dict"])
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoCapabilities;
    use crate::registry::AttributeLookup;

    #[test]
    fn test_standard_registry() {
        let registry = RegistryPresets::standard();
        assert!(registry.builtin("len").is_some());
        assert!(registry.builtin("call").is_some());
        assert!(registry.is_safe_attribute("str", "upper", &NoCapabilities));
        assert_eq!(
            registry.lookup_attribute("str", "format"),
            AttributeLookup::Forbidden
        );
        assert_eq!(
            registry.attribute_mapping("length", Some("list")).map(|m| m.builtin.as_str()),
            Some("len")
        );
    }

    #[test]
    fn test_module_exports_carry_requirements() {
        let registry = RegistryPresets::standard();
        let read = registry.module("fs").and_then(|m| m.export("read_text")).unwrap();
        assert!(read.required_capabilities.contains("file.read"));
        let get = registry.module("http").and_then(|m| m.export("get")).unwrap();
        assert!(get.required_capabilities.contains("net.http"));
    }

    #[test]
    fn test_minimal_has_no_modules() {
        let registry = RegistryPresets::minimal();
        assert_eq!(registry.module_names().count(), 0);
        assert!(registry.builtin("print").is_some());
    }
}
