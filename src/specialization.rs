use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::sync::Arc;

use crate::backend::{Backend, BackendError};
use crate::utils::join_into_string;

/// A preprocessor definition passed to the program compiler: either a bare
/// flag (`-DNAME`) or a definition with a value (`-DNAME=value`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct BuildOption {
    name: String,
    value: Option<String>,
}

/// The set of options a program is compiled with, at most one per name.
///
/// Options compare as a set, so the order in which they were added has no
/// effect on equality or on cache lookups. Adding an option whose name is
/// already present replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BuildOptions(BTreeSet<BuildOption>);

/// Identifies one compiled variant of a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ProgramKey {
    pub name: String,
    pub options: BuildOptions,
}

/// A cache of compiled programs keyed by [ProgramKey].
///
/// One cache is meant to be shared by every operation configured against a
/// device for as long as the device lives. It is passed explicitly to each
/// `configure` call; dropping or [clear](ProgramCache::clear)ing it is the
/// teardown.
///
/// The lock is held across lookup, compile, and insert, so concurrent
/// requests for one key compile it exactly once.
#[derive(Debug)]
pub struct ProgramCache<P> {
    programs: Mutex<HashMap<ProgramKey, Arc<P>>>,
}

impl BuildOption {
    pub fn flag(name: impl Into<String>) -> Self {
        BuildOption {
            name: name.into(),
            value: None,
        }
    }

    pub fn define(name: impl Into<String>, value: impl Display) -> Self {
        BuildOption {
            name: name.into(),
            value: Some(value.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

impl Display for BuildOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "-D{}={}", self.name, value),
            None => write!(f, "-D{}", self.name),
        }
    }
}

impl BuildOptions {
    pub fn new() -> Self {
        BuildOptions::default()
    }

    pub fn add(&mut self, option: BuildOption) -> &mut Self {
        self.0.retain(|o| o.name != option.name);
        self.0.insert(option);
        self
    }

    pub fn add_flag(&mut self, name: impl Into<String>) -> &mut Self {
        self.add(BuildOption::flag(name))
    }

    pub fn add_define(&mut self, name: impl Into<String>, value: impl Display) -> &mut Self {
        self.add(BuildOption::define(name, value))
    }

    pub fn add_if(&mut self, condition: bool, option: BuildOption) -> &mut Self {
        if condition {
            self.add(option);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildOption> + '_ {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&BuildOption> {
        self.0.iter().find(|o| o.name == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<BuildOption> for BuildOptions {
    fn from_iter<T: IntoIterator<Item = BuildOption>>(iter: T) -> Self {
        let mut options = BuildOptions::new();
        for option in iter {
            options.add(option);
        }
        options
    }
}

impl Display for BuildOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", join_into_string(&self.0, " "))
    }
}

impl Display for ProgramKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.options.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} {}", self.name, self.options)
        }
    }
}

impl<P> ProgramCache<P> {
    pub fn new() -> Self {
        ProgramCache {
            programs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the program cached for `(name, options)`, calling `build` to
    /// produce and cache it on a miss. A failed build caches nothing.
    pub fn get_or_build<E>(
        &self,
        name: &str,
        options: &BuildOptions,
        build: impl FnOnce(&str, &BuildOptions) -> Result<P, E>,
    ) -> Result<Arc<P>, E> {
        let key = ProgramKey {
            name: name.to_string(),
            options: options.clone(),
        };
        let mut programs = self.programs.lock();
        if let Some(program) = programs.get(&key) {
            log::debug!("Program cache hit: {}", key);
            return Ok(Arc::clone(program));
        }
        log::debug!("Program cache miss: {}", key);
        let program = Arc::new(build(name, options)?);
        programs.insert(key, Arc::clone(&program));
        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.programs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.lock().is_empty()
    }

    pub fn contains(&self, name: &str, options: &BuildOptions) -> bool {
        self.programs.lock().contains_key(&ProgramKey {
            name: name.to_string(),
            options: options.clone(),
        })
    }

    /// Drops every cached program.
    pub fn clear(&self) {
        self.programs.lock().clear();
    }

    /// [ProgramCache::get_or_build] with `backend` as the compiler.
    pub fn get_or_compile<B>(
        &self,
        backend: &B,
        name: &str,
        options: &BuildOptions,
    ) -> Result<Arc<P>, BackendError>
    where
        B: Backend<Program = P>,
    {
        self.get_or_build(name, options, |name, options| {
            backend.compile(name, options)
        })
    }
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        ProgramCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Options with distinct names, so that their order doesn't matter.
    fn arb_options() -> impl Strategy<Value = Vec<BuildOption>> {
        prop::collection::btree_map("[A-E]", prop::option::of(0u8..3), 0..5).prop_map(|m| {
            m.into_iter()
                .map(|(name, value)| match value {
                    Some(v) => BuildOption::define(name, v),
                    None => BuildOption::flag(name),
                })
                .collect()
        })
    }

    #[test]
    fn test_options_display_as_defines() {
        let mut options = BuildOptions::new();
        options.add_define("DATA_TYPE", "half").add_flag("DATA_TYPE_FP16");
        assert_eq!(options.to_string(), "-DDATA_TYPE=half -DDATA_TYPE_FP16");
        assert_eq!(options.get("DATA_TYPE").and_then(|o| o.value()), Some("half"));
    }

    #[test]
    fn test_redefinition_replaces_earlier_value() {
        let mut options = BuildOptions::new();
        options.add_define("X", 1).add_define("X", 2);
        assert_eq!(options.len(), 1);
        assert_eq!(options.to_string(), "-DX=2");
        options.add_flag("X");
        assert_eq!(options.to_string(), "-DX");

        let collected: BuildOptions = [BuildOption::define("X", 1), BuildOption::define("X", 2)]
            .into_iter()
            .collect();
        assert_eq!(collected, options.add_define("X", 2).clone());
    }

    #[test]
    fn test_options_ignore_insertion_order() {
        let mut a = BuildOptions::new();
        a.add_define("GROUPS", 2).add_define("K", 4);
        let mut b = BuildOptions::new();
        b.add_define("K", 4).add_define("GROUPS", 2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let cache = ProgramCache::<u32>::new();
        let options = BuildOptions::new();
        let failed: Result<_, &str> = cache.get_or_build("p", &options, |_, _| Err("boom"));
        assert!(failed.is_err());
        assert!(cache.is_empty());
        let built: Result<_, &str> = cache.get_or_build("p", &options, |_, _| Ok(7));
        assert_eq!(*built.unwrap(), 7);
        assert!(cache.contains("p", &options));
    }

    #[test]
    fn test_clear_forces_rebuild() {
        let cache = ProgramCache::<u32>::new();
        let options = BuildOptions::new();
        let builds = AtomicUsize::new(0);
        let build = |_: &str, _: &BuildOptions| -> Result<u32, ()> {
            Ok(u32::try_from(builds.fetch_add(1, Ordering::SeqCst)).unwrap())
        };
        cache.get_or_build("p", &options, build).unwrap();
        cache.clear();
        cache.get_or_build("p", &options, build).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_requests_compile_once() {
        let cache = ProgramCache::<usize>::new();
        let options: BuildOptions = [BuildOption::define("N", 1)].into_iter().collect();
        let builds = AtomicUsize::new(0);
        let programs = std::thread::scope(|s| {
            let handles = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        cache
                            .get_or_build("p", &options, |_, _| -> Result<usize, ()> {
                                Ok(builds.fetch_add(1, Ordering::SeqCst))
                            })
                            .unwrap()
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(programs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    proptest! {
        #[test]
        fn test_cache_is_deterministic(a in arb_options(), b in arb_options()) {
            let cache = ProgramCache::<BuildOptions>::new();
            let a_set: BuildOptions = a.iter().cloned().collect();
            let b_set: BuildOptions = b.iter().cloned().collect();
            let build = |_: &str, o: &BuildOptions| -> Result<_, ()> { Ok(o.clone()) };

            let first = cache.get_or_build("p", &a_set, build).unwrap();
            let reversed: BuildOptions = a.iter().rev().cloned().collect();
            let again = cache.get_or_build("p", &reversed, build).unwrap();
            prop_assert!(Arc::ptr_eq(&first, &again));

            let other = cache.get_or_build("p", &b_set, build).unwrap();
            prop_assert_eq!(Arc::ptr_eq(&first, &other), a_set == b_set);
            prop_assert_eq!(&*other, &b_set);
        }
    }
}
