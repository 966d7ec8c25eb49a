use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::archive::{self, ArchiveKind};
use crate::discover::{find_headers_dir, find_unpacked_libraries, LibraryMatcher};
use crate::source::{Materialized, PackageSource};

/// A single file on disk: a shared object, or a package archive (`.deb`,
/// `.conda`, `.tar.*`, `.zip`) that is unpacked below the work directory. A
/// directory is taken as an already unpacked package. It has no version list.
#[derive(Clone, Debug)]
pub struct LocalFile {
    path: PathBuf,
    matcher: LibraryMatcher,
}

impl LocalFile {
    pub fn new(path: PathBuf, matcher: LibraryMatcher) -> Self {
        Self { path, matcher }
    }

    fn unpacked(&self, root: PathBuf, package: &str) -> Result<Materialized> {
        let libraries = find_unpacked_libraries(&root, package, &self.matcher);
        if libraries.is_empty() {
            bail!("no shared library found in {}", self.path.display());
        }
        Ok(Materialized { headers_dir: find_headers_dir(&root), root, libraries })
    }
}

impl PackageSource for LocalFile {
    fn list_versions(&self, _package: &str) -> Result<Vec<String>> {
        bail!("a local file has no version list: {}", self.path.display())
    }

    fn materialize(&self, package: &str, _version: &str, work_dir: &Path) -> Result<Materialized> {
        let meta = fs::metadata(&self.path).with_context(|| format!("local file not found: {}", self.path.display()))?;
        if meta.is_dir() {
            return self.unpacked(self.path.clone(), package);
        }
        if ArchiveKind::detect(&self.path).is_some() {
            let root = work_dir.join("root");
            archive::unpack(&self.path, &root)?;
            return self.unpacked(root, package);
        }
        let root = self.path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Materialized { root, libraries: vec![self.path.clone()], headers_dir: None })
    }
}

/// A directory holding one subdirectory per version.
#[derive(Clone, Debug)]
pub struct LocalTree {
    root: PathBuf,
    matcher: LibraryMatcher,
}

impl LocalTree {
    pub fn new(root: PathBuf, matcher: LibraryMatcher) -> Self {
        Self { root, matcher }
    }
}

impl PackageSource for LocalTree {
    fn list_versions(&self, _package: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root).with_context(|| format!("read {}", self.root.display()))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        out.sort();
        Ok(out)
    }

    fn materialize(&self, package: &str, version: &str, _work_dir: &Path) -> Result<Materialized> {
        let dir = self.root.join(version);
        if !dir.is_dir() {
            bail!("version {version} not found under {}", self.root.display());
        }
        let libraries = find_unpacked_libraries(&dir, package, &self.matcher);
        if libraries.is_empty() {
            bail!("no library found in {}", dir.display());
        }
        Ok(Materialized { headers_dir: find_headers_dir(&dir), root: dir, libraries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"\x7fELF").unwrap();
    }

    #[test]
    fn tree_lists_and_materializes_versions() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("foo");
        touch(&root, "1.0/lib/libfoo.so.1.0");
        touch(&root, "1.1/lib/libfoo.so.1.1");
        touch(&root, "1.1/include/foo.h");
        touch(&root, "2.0/lib/libbar.so.2");
        touch(&root, "README");

        let tree = LocalTree::new(root.clone(), LibraryMatcher::default());
        assert_eq!(tree.list_versions("foo").unwrap(), vec!["1.0", "1.1", "2.0"]);

        let m = tree.materialize("foo", "1.1", dir.path()).unwrap();
        assert_eq!(m.libraries, vec![root.join("1.1/lib/libfoo.so.1.1")]);
        assert_eq!(m.headers_dir, Some(root.join("1.1/include")));

        let other = tree.materialize("foo", "2.0", dir.path()).unwrap();
        assert_eq!(other.libraries, vec![root.join("2.0/lib/libbar.so.2")]);

        assert!(tree.materialize("foo", "9.9", dir.path()).is_err());
    }

    #[test]
    fn local_file_checks_existence() {
        let dir = tempdir().unwrap();
        let lib = dir.path().join("libx.so.1");
        let src = LocalFile::new(lib.clone(), LibraryMatcher::default());
        assert!(src.materialize("libx", "", dir.path()).is_err());
        fs::write(&lib, b"ELF").unwrap();
        assert_eq!(src.materialize("libx", "", dir.path()).unwrap().libraries, vec![lib]);
        assert!(src.list_versions("libx").is_err());
    }

    #[test]
    fn local_directory_is_an_unpacked_package() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("dal-2025.9.0");
        touch(&root, "lib/libonedal.so.3");
        touch(&root, "include/dal.h");
        let m = LocalFile::new(root.clone(), LibraryMatcher::default())
            .materialize("dal-2025.9.0", "", dir.path())
            .unwrap();
        assert_eq!(m.libraries, vec![root.join("lib/libonedal.so.3")]);
        assert_eq!(m.headers_dir, Some(root.join("include")));

        let empty = dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        assert!(LocalFile::new(empty, LibraryMatcher::default()).materialize("x", "", dir.path()).is_err());
    }

    #[test]
    fn local_deb_is_unpacked_into_the_work_dir() {
        use crate::archive::tests::{gzip, tar_bytes, write_deb};

        let dir = tempdir().unwrap();
        let deb = dir.path().join("intel-oneapi-ccl_2021.17.2-5_amd64.deb");
        write_deb(&deb, gzip(&tar_bytes(&[("./opt/intel/oneapi/ccl/lib/libccl.so.1.0", "\x7fELF")])));

        let work = dir.path().join("work");
        let src = LocalFile::new(deb, LibraryMatcher::default());
        let m = src.materialize("intel-oneapi-ccl_2021.17.2-5_amd64", "", &work).unwrap();
        assert_eq!(m.root, work.join("root"));
        assert_eq!(m.libraries, vec![work.join("root/opt/intel/oneapi/ccl/lib/libccl.so.1.0")]);
    }
}
