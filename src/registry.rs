//! Static list of every module the host knows how to run

use anyhow::Result;

use crate::module::Module;
use crate::{import_saver, releases, trailers, Config};

/// Builds a module from configuration; `Ok(None)` means its section is absent
pub type ModuleBuilder = fn(&Config) -> Result<Option<Box<dyn Module>>>;

pub struct ModuleEntry {
    pub name: &'static str,
    pub build: ModuleBuilder,
}

pub static MODULES: &[ModuleEntry] = &[
    ModuleEntry {
        name: import_saver::NAME,
        build: import_saver::build,
    },
    ModuleEntry {
        name: releases::NAME,
        build: releases::build,
    },
    ModuleEntry {
        name: trailers::NAME,
        build: trailers::build,
    },
];
