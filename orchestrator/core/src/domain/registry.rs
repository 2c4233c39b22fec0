// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Framework Registry
//!
//! Closed, declarative table of handler kinds and their configuration
//! requirements. The single source of truth used by the supervisor (launch
//! validation) and the control plane (UI hints). New handlers require a row
//! here and an implementation; there is no runtime reflection.
//!
//! | kind      | provider | model | implicit provider | models |
//! |-----------|----------|-------|-------------------|--------|
//! | echo      | no       | no    | —                 | —      |
//! | ollama    | no       | yes   | ollama            | discovered from the local endpoint |
//! | anthropic | no       | yes   | anthropic         | fixed list |
//! | openai    | no       | yes   | openai            | fixed list |
//! | graph     | yes      | yes   | —                 | depends on provider |

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Echo,
    Ollama,
    Anthropic,
    OpenAi,
    Graph,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Echo => "echo",
            HandlerKind::Ollama => "ollama",
            HandlerKind::Anthropic => "anthropic",
            HandlerKind::OpenAi => "openai",
            HandlerKind::Graph => "graph",
        }
    }

    pub fn all() -> &'static [HandlerKind] {
        &[
            HandlerKind::Echo,
            HandlerKind::Ollama,
            HandlerKind::Anthropic,
            HandlerKind::OpenAi,
            HandlerKind::Graph,
        ]
    }
}

impl std::str::FromStr for HandlerKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "echo" => Ok(HandlerKind::Echo),
            "ollama" => Ok(HandlerKind::Ollama),
            "anthropic" => Ok(HandlerKind::Anthropic),
            "openai" => Ok(HandlerKind::OpenAi),
            "graph" => Ok(HandlerKind::Graph),
            other => Err(RegistryError::UnknownHandler(other.to_string())),
        }
    }
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a framework's model list is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCatalog {
    /// No model at all (echo).
    None,
    /// Closed list shipped with the registry.
    Fixed(&'static [&'static str]),
    /// Enumerated from a local endpoint at launch; the registry cannot
    /// validate it statically.
    Discovered,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameworkSpec {
    pub kind: HandlerKind,
    pub display_name: &'static str,
    pub requires_provider: bool,
    pub requires_model: bool,
    pub implicit_provider: Option<&'static str>,
    pub default_model: Option<&'static str>,
    pub models: ModelCatalog,
}

pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-opus-4-1",
    "claude-sonnet-4-5",
    "claude-haiku-4-5",
];

pub const OPENAI_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "o3-mini"];

/// Providers a `graph` deployment may route through.
pub const GRAPH_PROVIDERS: &[&str] = &["anthropic", "openai", "ollama"];

const FRAMEWORKS: &[FrameworkSpec] = &[
    FrameworkSpec {
        kind: HandlerKind::Echo,
        display_name: "Echo",
        requires_provider: false,
        requires_model: false,
        implicit_provider: None,
        default_model: None,
        models: ModelCatalog::None,
    },
    FrameworkSpec {
        kind: HandlerKind::Ollama,
        display_name: "Ollama (local)",
        requires_provider: false,
        requires_model: true,
        implicit_provider: Some("ollama"),
        default_model: Some("llama3.2"),
        models: ModelCatalog::Discovered,
    },
    FrameworkSpec {
        kind: HandlerKind::Anthropic,
        display_name: "Anthropic Agent",
        requires_provider: false,
        requires_model: true,
        implicit_provider: Some("anthropic"),
        default_model: Some("claude-sonnet-4-5"),
        models: ModelCatalog::Fixed(ANTHROPIC_MODELS),
    },
    FrameworkSpec {
        kind: HandlerKind::OpenAi,
        display_name: "OpenAI Agent",
        requires_provider: false,
        requires_model: true,
        implicit_provider: Some("openai"),
        default_model: Some("gpt-4o-mini"),
        models: ModelCatalog::Fixed(OPENAI_MODELS),
    },
    FrameworkSpec {
        kind: HandlerKind::Graph,
        display_name: "Graph Agent",
        requires_provider: true,
        requires_model: true,
        implicit_provider: None,
        default_model: None,
        models: ModelCatalog::Discovered,
    },
];

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown handler kind: {0}")]
    UnknownHandler(String),

    #[error("handler '{0}' requires a provider")]
    MissingProvider(HandlerKind),

    #[error("handler '{0}' requires a model")]
    MissingModel(HandlerKind),

    #[error("provider '{provider}' is not valid for handler '{kind}'")]
    InvalidProvider { kind: HandlerKind, provider: String },

    #[error("model '{model}' is not valid for handler '{kind}'")]
    InvalidModel { kind: HandlerKind, model: String },
}

pub fn framework_registry() -> &'static [FrameworkSpec] {
    FRAMEWORKS
}

pub fn spec_for(kind: HandlerKind) -> &'static FrameworkSpec {
    FRAMEWORKS
        .iter()
        .find(|spec| spec.kind == kind)
        .expect("every handler kind has a registry row")
}

/// Validate a launch request against the registry table. The `ollama` model
/// list is discovered at launch, so only presence is checked here; the
/// supervisor confirms availability against the endpoint separately.
pub fn validate_launch(
    kind: HandlerKind,
    provider: Option<&str>,
    model: Option<&str>,
) -> Result<(), RegistryError> {
    let spec = spec_for(kind);

    match (spec.requires_provider, provider) {
        (true, None) => return Err(RegistryError::MissingProvider(kind)),
        (true, Some(provider)) if kind == HandlerKind::Graph => {
            if !GRAPH_PROVIDERS.contains(&provider) {
                return Err(RegistryError::InvalidProvider {
                    kind,
                    provider: provider.to_string(),
                });
            }
        }
        (false, Some(provider)) => {
            // A provider on a fixed-provider framework must at least agree
            // with the implicit one.
            if let Some(implicit) = spec.implicit_provider {
                if provider != implicit {
                    return Err(RegistryError::InvalidProvider {
                        kind,
                        provider: provider.to_string(),
                    });
                }
            }
        }
        _ => {}
    }

    match (spec.requires_model, model) {
        (true, None) => return Err(RegistryError::MissingModel(kind)),
        (true, Some(model)) => {
            if let ModelCatalog::Fixed(valid) = spec.models {
                if !valid.contains(&model) {
                    return Err(RegistryError::InvalidModel {
                        kind,
                        model: model.to_string(),
                    });
                }
            }
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_row() {
        for kind in HandlerKind::all() {
            let spec = spec_for(*kind);
            assert_eq!(spec.kind, *kind);
        }
    }

    #[test]
    fn echo_needs_nothing() {
        assert!(validate_launch(HandlerKind::Echo, None, None).is_ok());
    }

    #[test]
    fn graph_needs_provider_and_model() {
        assert!(matches!(
            validate_launch(HandlerKind::Graph, None, Some("gpt-4o")),
            Err(RegistryError::MissingProvider(_))
        ));
        assert!(matches!(
            validate_launch(HandlerKind::Graph, Some("openai"), None),
            Err(RegistryError::MissingModel(_))
        ));
        assert!(validate_launch(HandlerKind::Graph, Some("openai"), Some("gpt-4o")).is_ok());
        assert!(matches!(
            validate_launch(HandlerKind::Graph, Some("qdrant"), Some("x")),
            Err(RegistryError::InvalidProvider { .. })
        ));
    }

    #[test]
    fn fixed_model_lists_are_enforced() {
        assert!(validate_launch(HandlerKind::OpenAi, None, Some("gpt-4o")).is_ok());
        assert!(matches!(
            validate_launch(HandlerKind::OpenAi, None, Some("made-up")),
            Err(RegistryError::InvalidModel { .. })
        ));
        assert!(matches!(
            validate_launch(HandlerKind::Anthropic, None, None),
            Err(RegistryError::MissingModel(_))
        ));
    }

    #[test]
    fn provider_override_must_match_implicit() {
        assert!(matches!(
            validate_launch(HandlerKind::Ollama, Some("openai"), Some("llama3.2")),
            Err(RegistryError::InvalidProvider { .. })
        ));
        assert!(validate_launch(HandlerKind::Ollama, Some("ollama"), Some("llama3.2")).is_ok());
    }

    #[test]
    fn kind_parses_from_str() {
        assert_eq!("graph".parse::<HandlerKind>().unwrap(), HandlerKind::Graph);
        assert!("langchain".parse::<HandlerKind>().is_err());
    }
}
