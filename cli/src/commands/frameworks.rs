// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Print the framework registry, the same table the control plane serves at
//! `GET /frameworks`.

use colored::Colorize;

use aviary_core::domain::registry::{framework_registry, ModelCatalog};

pub fn run() {
    println!("{}", "Handler frameworks".bold());
    for spec in framework_registry() {
        println!(
            "\n  {} — {}",
            spec.kind.as_str().green().bold(),
            spec.display_name
        );
        println!(
            "    provider: {}",
            if spec.requires_provider {
                "required".to_string()
            } else {
                spec.implicit_provider
                    .map(|provider| format!("implicit ({provider})"))
                    .unwrap_or_else(|| "none".to_string())
            }
        );
        let models = match spec.models {
            ModelCatalog::None => "none".to_string(),
            ModelCatalog::Fixed(models) => models.join(", "),
            ModelCatalog::Discovered => "discovered from the local endpoint".to_string(),
        };
        println!(
            "    model:    {}",
            if spec.requires_model {
                format!(
                    "required ({models}){}",
                    spec.default_model
                        .map(|model| format!(", default {model}"))
                        .unwrap_or_default()
                )
            } else {
                "none".to_string()
            }
        );
    }
}
