// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Rendering of one-shot command results

use crate::cli::OutputFormat;
use crate::kubernetes::SelectorSet;
use std::collections::HashSet;

/// Render a member set, sorted by name
pub fn format_members(members: &HashSet<String>, format: OutputFormat) -> String {
    let mut names: Vec<&String> = members.iter().collect();
    names.sort();

    match format {
        OutputFormat::Text => names
            .iter()
            .map(|n| n.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => {
            serde_json::to_string_pretty(&names).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Yaml => serde_yaml::to_string(&names).unwrap_or_else(|_| "[]".to_string()),
    }
}

/// Render compiled selectors, one per line
pub fn format_selectors(selectors: &SelectorSet) -> String {
    if selectors.is_empty() {
        return "No discovery selectors: all namespaces are in scope".to_string();
    }
    selectors
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}: {}", i, s))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

    fn members() -> HashSet<String> {
        ["prod-b", "istio-system", "prod-a"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_format_members_text_sorted() {
        assert_eq!(
            format_members(&members(), OutputFormat::Text),
            "istio-system\nprod-a\nprod-b"
        );
        assert_eq!(format_members(&HashSet::new(), OutputFormat::Text), "");
    }

    #[test]
    fn test_format_members_json() {
        let json = format_members(&members(), OutputFormat::Json);
        let parsed: Vec<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, vec!["istio-system", "prod-a", "prod-b"]);
    }

    #[test]
    fn test_format_members_yaml() {
        let yaml = format_members(&members(), OutputFormat::Yaml);
        let parsed: Vec<String> = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, vec!["istio-system", "prod-a", "prod-b"]);
    }

    #[test]
    fn test_format_selectors() {
        let empty = SelectorSet::compile(&[]).unwrap();
        assert!(format_selectors(&empty).contains("all namespaces"));

        let set = SelectorSet::compile(&[
            LabelSelector {
                match_labels: Some([("env".to_string(), "prod".to_string())].into()),
                ..Default::default()
            },
            LabelSelector::default(),
        ])
        .unwrap();
        assert_eq!(format_selectors(&set), "0: env=prod\n1: <everything>");
    }
}
