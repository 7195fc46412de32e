//! What the auditor reads out of a module image.
//!
//! Only metadata is inspected, never method bodies: the module's declared
//! references and the namespaces of every foreign type named by a field,
//! property, parameter, return type or attribute.

use std::collections::HashSet;

use quill_lang::{AttributeImage, ModuleImage, TypeRef};

/// The security-relevant surface of one module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataSummary {
    pub module_name: String,
    /// Referenced external modules, in declaration order.
    pub references: Vec<String>,
    /// Foreign namespaces, in first-seen order.
    pub namespaces: Vec<String>,
}

impl MetadataSummary {
    pub fn of(image: &ModuleImage) -> Self {
        let own: HashSet<&str> = image
            .types
            .iter()
            .map(|t| t.namespace.as_str())
            .filter(|ns| !ns.is_empty())
            .collect();

        let mut collector = Collector {
            own,
            seen: HashSet::new(),
            namespaces: Vec::new(),
        };
        for ty in &image.types {
            collector.attributes(&ty.attributes);
            for field in &ty.fields {
                collector.type_ref(&field.ty);
                collector.attributes(&field.attributes);
            }
            for property in &ty.properties {
                collector.type_ref(&property.ty);
                collector.attributes(&property.attributes);
            }
            for ctor in &ty.constructors {
                for param in &ctor.params {
                    collector.type_ref(&param.ty);
                }
            }
            for method in &ty.methods {
                collector.type_ref(&method.returns);
                for param in &method.params {
                    collector.type_ref(&param.ty);
                }
                collector.attributes(&method.attributes);
            }
        }

        let mut references = Vec::new();
        for reference in &image.references {
            if !references.contains(reference) {
                references.push(reference.clone());
            }
        }

        Self {
            module_name: image.name.clone(),
            references,
            namespaces: collector.namespaces,
        }
    }
}

struct Collector<'a> {
    own: HashSet<&'a str>,
    seen: HashSet<String>,
    namespaces: Vec<String>,
}

impl Collector<'_> {
    fn type_ref(&mut self, ty: &TypeRef) {
        let TypeRef::External(_) = ty else { return };
        let Some(namespace) = ty.namespace() else { return };
        if self.own.contains(namespace) {
            return;
        }
        if self.seen.insert(namespace.to_string()) {
            self.namespaces.push(namespace.to_string());
        }
    }

    fn attributes(&mut self, attributes: &[AttributeImage]) {
        for attr in attributes {
            self.type_ref(&attr.ty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_lang::{compile_units, SourceUnit};
    use quill_types::OutputKind;

    fn summary(src: &str, refs: &[&str]) -> MetadataSummary {
        let refs: Vec<String> = refs.iter().map(|r| r.to_string()).collect();
        let out = compile_units(
            "QuillModule1",
            &[SourceUnit::new("t.ql", src)],
            &refs,
            OutputKind::Library,
        );
        MetadataSummary::of(&out.image.expect("image"))
    }

    #[test]
    fn collects_every_metadata_position() {
        let s = summary(
            r#"
(type A (attr Meta.Tags.Marker)
  (field f Host.FileSystem.File)
  (property p Net.Http.Client)
  (init ((x Ui.Widgets.Label)))
  (method m ((arg Audio.Clip)) Physics.Body null)
  (method n () Unit (attr Tools.Debug.Trace)))
"#,
            &[],
        );
        assert_eq!(
            s.namespaces,
            vec![
                "Meta.Tags",
                "Host.FileSystem",
                "Net.Http",
                "Ui.Widgets",
                "Physics",
                "Audio",
                "Tools.Debug",
            ]
        );
    }

    #[test]
    fn base_types_and_own_namespaces_are_not_foreign() {
        let s = summary(
            "(namespace Game (type A (extends Engine.Component) (field other Game.B) (field t Game.Tag)) (type B (field x Int)))",
            &[],
        );
        assert!(s.namespaces.is_empty(), "{:?}", s.namespaces);
    }

    #[test]
    fn references_in_order() {
        let s = summary(
            "(use \"engine\") (use \"net\") (use \"engine\") (type A (field x Int))",
            &["net", "engine"],
        );
        assert_eq!(s.references, vec!["engine", "net"]);
        assert_eq!(s.module_name, "QuillModule1");
    }
}
