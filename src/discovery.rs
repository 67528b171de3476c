use crate::{config::Config, routines};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Error)]
#[error("discovery failed for {}: {reason}", .module.display())]
pub struct DiscoveryFailure {
    pub module: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Discovery {
    pub tests: BTreeSet<String>,
    pub failures: Vec<DiscoveryFailure>,
}

/// Rescans every source on each call; nothing is cached.
pub fn discover(cfg: &Config) -> Discovery {
    let mut out = Discovery::default();

    if cfg.discovery.include_builtin {
        for routine in routines::registry() {
            out.tests.insert(routines::builtin_identifier(*routine));
        }
    }

    let tests_dir = PathBuf::from(&cfg.discovery.tests_dir);
    if !tests_dir.is_dir() {
        debug!("tests_dir {} not found; no test modules", tests_dir.display());
        return out;
    }

    let class_re = match class_pattern(&cfg.discovery.class_prefix) {
        Ok(re) => re,
        Err(err) => {
            out.failures.push(DiscoveryFailure {
                module: tests_dir,
                reason: format!("invalid class_prefix: {err}"),
            });
            return out;
        }
    };

    let mut modules = Vec::new();
    collect_modules(&tests_dir, &cfg.discovery.extensions, &mut modules, &mut out.failures);
    modules.sort();

    for module in modules {
        match std::fs::read_to_string(&module) {
            Ok(src) => {
                let rel = module_reference(&tests_dir, &cfg.discovery.tests_dir, &module);
                for name in scan_classes(&class_re, &src) {
                    out.tests.insert(format!("{rel}::{name}"));
                }
            }
            Err(err) => {
                warn!("skipping test module {}: {err}", module.display());
                out.failures.push(DiscoveryFailure {
                    module,
                    reason: err.to_string(),
                });
            }
        }
    }

    out
}

fn class_pattern(prefix: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"(?m)^class[ \t]+({}[A-Za-z0-9_]*)[ \t]*[:(]",
        regex::escape(prefix)
    ))
}

/// Module-level class declarations whose name carries the configured
/// prefix, in source order. Indented (nested) classes are not addressable
/// by `<module>::<name>` and are left out.
pub fn scan_classes(class_re: &Regex, src: &str) -> Vec<String> {
    class_re
        .captures_iter(src)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn collect_modules(
    dir: &Path,
    extensions: &[String],
    modules: &mut Vec<PathBuf>,
    failures: &mut Vec<DiscoveryFailure>,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            failures.push(DiscoveryFailure {
                module: dir.to_path_buf(),
                reason: err.to_string(),
            });
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_modules(&path, extensions, modules, failures);
            continue;
        }
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if matches_ext {
            modules.push(path);
        }
    }
}

/// `<tests_dir as configured>/<path relative to it>`, `/`-separated.
fn module_reference(tests_dir: &Path, configured: &str, module: &Path) -> String {
    let rel = module.strip_prefix(tests_dir).unwrap_or(module);
    let rel = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let base = configured.trim_end_matches(['/', '\\']);
    if base.is_empty() || base == "." {
        rel
    } else {
        format!("{base}/{rel}")
    }
}
