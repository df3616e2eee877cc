// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Discovery namespace scoping for Kubernetes control planes
//!
//! [`kubernetes::DiscoveryNamespacesFilter`] keeps track of the namespaces picked
//! by a set of label selectors and tells registered handlers whenever a namespace
//! enters or leaves that set.

pub mod cli;
pub mod config;
pub mod kubernetes;
pub mod output;
