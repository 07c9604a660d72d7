//! Where an annotation of a carrier ends up in the EDM document.

use crate::vocabulary::TermDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierKind {
    Service,
    Entity,
    Type,
    Element,
    Callable,
    Parameter,
}

impl CarrierKind {
    pub fn describe(self) -> &'static str {
        match self {
            CarrierKind::Service => "service",
            CarrierKind::Entity => "entity",
            CarrierKind::Type => "type",
            CarrierKind::Element => "element",
            CarrierKind::Callable => "action or function",
            CarrierKind::Parameter => "parameter",
        }
    }
}

/// Entity set or singleton of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerChild {
    /// `S.EntityContainer/Books`
    pub path: String,
    pub singleton: bool,
}

/// An annotated construct together with the names of everything it is
/// rendered as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Carrier {
    Service {
        name: String,
    },
    Entity {
        type_name: String,
        container_child: Option<ContainerChild>,
    },
    Type {
        type_name: String,
        structured: bool,
    },
    Element {
        /// Qualified entity or complex type.
        owner: String,
        /// Structured (`a/b`) or flat (`a_b`) property path.
        path: String,
        navigation: bool,
    },
    Callable {
        /// V4 overload (`S.submit(S.Orders)`).
        overload: Option<String>,
        /// Container import (`S.EntityContainer/submit`).
        import: Option<String>,
        is_function: bool,
        v2: bool,
    },
    Parameter {
        callable: String,
        name: String,
    },
}

impl Carrier {
    pub fn kind(&self) -> CarrierKind {
        match self {
            Carrier::Service { .. } => CarrierKind::Service,
            Carrier::Entity { .. } => CarrierKind::Entity,
            Carrier::Type { .. } => CarrierKind::Type,
            Carrier::Element { .. } => CarrierKind::Element,
            Carrier::Callable { .. } => CarrierKind::Callable,
            Carrier::Parameter { .. } => CarrierKind::Parameter,
        }
    }

    /// Target of an annotation with `term`; `None` if the term can't be
    /// applied here. Undeclared terms apply anywhere.
    pub fn place(&self, term: Option<&TermDef>) -> Option<String> {
        let applies = |construct: &str| term.map_or(true, |t| t.applies(construct));
        match self {
            Carrier::Service { name } => {
                if applies("EntityContainer") {
                    Some(format!("{name}.EntityContainer"))
                } else if applies("Schema") {
                    Some(name.clone())
                } else {
                    None
                }
            }
            Carrier::Entity {
                type_name,
                container_child,
            } => {
                if applies("EntityType") {
                    return Some(type_name.clone());
                }
                let child = container_child.as_ref()?;
                let construct = if child.singleton { "Singleton" } else { "EntitySet" };
                applies(construct).then(|| child.path.clone())
            }
            Carrier::Type {
                type_name,
                structured,
            } => {
                let construct = if *structured { "ComplexType" } else { "TypeDefinition" };
                applies(construct).then(|| type_name.clone())
            }
            Carrier::Element {
                owner,
                path,
                navigation,
            } => {
                let construct = if *navigation { "NavigationProperty" } else { "Property" };
                applies(construct).then(|| format!("{owner}/{path}"))
            }
            Carrier::Callable {
                overload,
                import,
                is_function,
                v2,
            } => {
                let (own, imported) = if *is_function {
                    ("Function", "FunctionImport")
                } else {
                    ("Action", "ActionImport")
                };
                if *v2 {
                    // V2 only knows function imports
                    let fits = applies(own) || applies(imported) || applies("FunctionImport");
                    return import.clone().filter(|_| fits);
                }
                match overload {
                    Some(overload) if applies(own) => Some(overload.clone()),
                    _ if applies(imported) => import.clone(),
                    _ => None,
                }
            }
            Carrier::Parameter { callable, name } => applies("Parameter").then(|| format!("{callable}/{name}")),
        }
    }
}
