//! Configuration handling for the provisioner engine.
//!
//! This crate handles:
//! - Placeholder resolution (`{A}`, `{A.B}`, `{A.B.C}`)
//! - Env override files
//! - Resource definition documents
//! - The resource dependency graph
//! - Engine settings (provisioner.kdl)

pub mod definitions;
pub mod env_file;
pub mod error;
pub mod graph;
pub mod resolver;
pub mod settings;

pub use definitions::{DefinitionDocument, parse_definitions};
pub use env_file::{Overrides, load_env_file, parse_env};
pub use error::{ConfigError, ConfigResult};
pub use graph::{ReferenceRule, ResourceGraph, build_graph, default_rules};
pub use resolver::{ResolveMode, ResolveOptions, Resolver, placeholders_in};
pub use settings::{EngineSettings, RemoteSettings, load_settings, parse_settings};
