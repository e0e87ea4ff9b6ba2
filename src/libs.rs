//! Shared-library location and the parse-once library registry.

use std::collections::{HashMap, HashSet};
use std::env;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use log::{debug, info};

use crate::elf::Image;
use crate::types::{Warning, emit};

/// Directories searched for libraries that the dependency lister did not
/// resolve, before giving up on them.
const DEFAULT_LIB_DIRS: [&str; 6] = [
    "/lib64",
    "/usr/lib64",
    "/usr/local/lib64",
    "/lib",
    "/usr/lib",
    "/usr/local/lib",
];

/// Stable handle to a registered image. Index into the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryId(usize);

/// A callable unit discovered during call resolution: a named library
/// export, or an anonymous local target (empty name) that still has to
/// be redirected through the owning image's function table.
#[derive(Debug, Clone)]
pub struct LibFunction {
    pub name: String,
    pub lib: LibraryId,
    pub start: u64,
    pub end: u64,
}

// Two resolutions of the same (name, library) pair are the same analysis
// unit no matter how they were reached.
impl PartialEq for LibFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.lib == other.lib
    }
}

impl Eq for LibFunction {}

impl Hash for LibFunction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.lib.hash(state);
    }
}

/// Append-only cache of parsed images, keyed by library file name.
///
/// The main binary is registered first (id 0); every library is parsed
/// at most once and shared read-only afterwards. Registering an image
/// resolves its DT_NEEDED closure eagerly, inserting each cache entry
/// before chasing that entry's own dependencies so that dependency
/// cycles between libraries terminate.
pub struct LibraryRegistry {
    images: Vec<Rc<Image>>,
    by_name: HashMap<String, LibraryId>,
    ldd_paths: HashMap<String, PathBuf>,
    search_dirs: Vec<PathBuf>,
    /// Names already reported unresolvable; one warning each.
    missing: HashSet<String>,
}

impl LibraryRegistry {
    pub fn new(main: Image, warnings: &mut Vec<Warning>) -> Self {
        let ldd_paths = if main.has_dyn_libraries() {
            list_dependencies(&main.path)
        } else {
            HashMap::new()
        };

        // LD_LIBRARY_PATH entries first, the way the loader would.
        let mut search_dirs: Vec<PathBuf> = Vec::new();
        if let Ok(ld_path) = env::var("LD_LIBRARY_PATH") {
            search_dirs.extend(ld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
        search_dirs.extend(DEFAULT_LIB_DIRS.iter().map(|dir| PathBuf::from(*dir)));

        let mut registry = Self {
            images: Vec::new(),
            by_name: HashMap::new(),
            ldd_paths,
            search_dirs,
            missing: HashSet::new(),
        };
        registry.register(main, warnings);
        registry
    }

    pub fn main_id(&self) -> LibraryId {
        LibraryId(0)
    }

    pub fn image(&self, id: LibraryId) -> Rc<Image> {
        Rc::clone(&self.images[id.0])
    }

    /// Resolve a library by its DT_NEEDED name, loading and registering
    /// it (and its own dependency closure) on first use. Unlocatable or
    /// unparseable libraries are dropped from the analysis scope with a
    /// warning.
    pub fn resolve(&mut self, name: &str, warnings: &mut Vec<Warning>) -> Option<LibraryId> {
        if let Some(&id) = self.by_name.get(name) {
            return Some(id);
        }
        if self.missing.contains(name) {
            return None;
        }

        let Some(path) = self.locate(name) else {
            self.missing.insert(name.to_string());
            emit(warnings, Warning::LibraryNotFound { name: name.to_string() });
            return None;
        };

        match Image::load(&path) {
            Ok(image) => {
                info!("loaded library {name} from {}", path.display());
                Some(self.register(image, warnings))
            }
            Err(err) => {
                debug!("{}: {err}", path.display());
                self.missing.insert(name.to_string());
                emit(warnings, Warning::LibraryNotFound { name: name.to_string() });
                None
            }
        }
    }

    fn register(&mut self, image: Image, warnings: &mut Vec<Warning>) -> LibraryId {
        let id = LibraryId(self.images.len());
        let needed = image.libraries.clone();
        self.by_name.insert(image.file_name(), id);
        self.images.push(Rc::new(image));
        for name in needed {
            self.resolve(&name, warnings);
        }
        id
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        if let Some(path) = self.ldd_paths.get(name) {
            return Some(path.clone());
        }
        self.search_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.exists())
    }
}

/// Run the dynamic-linker dependency lister over the main binary and
/// collect name -> path mappings from its output. Failure is non-fatal;
/// the manual directory search covers whatever is missing.
fn list_dependencies(path: &Path) -> HashMap<String, PathBuf> {
    match Command::new("ldd").arg(path).output() {
        Ok(output) if output.status.success() => {
            parse_ldd_output(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            debug!(
                "ldd failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            HashMap::new()
        }
        Err(err) => {
            debug!("could not run ldd: {err}");
            HashMap::new()
        }
    }
}

fn parse_ldd_output(stdout: &str) -> HashMap<String, PathBuf> {
    let mut paths = HashMap::new();
    for line in stdout.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if let Some(arrow) = tokens.iter().position(|&t| t == "=>") {
            let (Some(&name), Some(&path)) = (tokens.first(), tokens.get(arrow + 1)) else {
                continue;
            };
            if path.starts_with('/') {
                paths.insert(name.to_string(), PathBuf::from(path));
            }
        } else if let Some(&first) = tokens.first() {
            // Lines like "/lib64/ld-linux-x86-64.so.2 (0x...)".
            if first.starts_with('/') {
                if let Some(file) = Path::new(first).file_name() {
                    paths.insert(file.to_string_lossy().into_owned(), PathBuf::from(first));
                }
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ldd_output_lines() {
        let out = "\tlinux-vdso.so.1 (0x00007ffd3cbd3000)\n\
                   \tlibc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f2a1c000000)\n\
                   \t/lib64/ld-linux-x86-64.so.2 (0x00007f2a1c2f4000)\n";
        let paths = parse_ldd_output(out);
        assert_eq!(
            paths.get("libc.so.6"),
            Some(&PathBuf::from("/lib/x86_64-linux-gnu/libc.so.6"))
        );
        assert_eq!(
            paths.get("ld-linux-x86-64.so.2"),
            Some(&PathBuf::from("/lib64/ld-linux-x86-64.so.2"))
        );
        // The vdso has no on-disk path and must not be invented.
        assert!(!paths.contains_key("linux-vdso.so.1"));
    }

    #[test]
    fn lib_function_identity_ignores_boundaries() {
        let a = LibFunction {
            name: "read".into(),
            lib: LibraryId(1),
            start: 0x1000,
            end: 0x1040,
        };
        let b = LibFunction {
            name: "read".into(),
            lib: LibraryId(1),
            start: 0x2000,
            end: 0x2040,
        };
        let c = LibFunction {
            name: "read".into(),
            lib: LibraryId(2),
            start: 0x1000,
            end: 0x1040,
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
