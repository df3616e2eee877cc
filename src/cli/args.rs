// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nsscope")]
#[command(
    author,
    version,
    about = "Track which Kubernetes namespaces are in scope for discovery"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file with discoverySelectors (JSON or YAML).
    /// Defaults to ~/.nsscope/config.yaml
    #[arg(short = 'f', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Kubernetes context to use (defaults to the kubeconfig current context)
    #[arg(short, long, value_name = "CONTEXT")]
    pub context: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Watch namespaces and keep the discovery scope up to date (default)
    Run {
        /// Seconds between config file reloads
        #[arg(long, default_value_t = 30)]
        reload_interval: u64,
    },

    /// Print the namespaces currently in scope and exit
    Members {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Validate the configured selectors and print them
    Check,
}

impl Default for Command {
    fn default() -> Self {
        Self::Run {
            reload_interval: 30,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}
