use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;

/// Stream compression of a tar payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
    Zstd,
    Bzip2,
}

impl Compression {
    fn decoder<'a, R: Read + 'a>(self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader).context("create zstd decoder")?),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
        })
    }
}

/// Compression of a tar file or member, judged by its name.
fn tar_compression(name: &str) -> Option<Compression> {
    const SUFFIXES: [(&str, Compression); 6] = [
        (".tar", Compression::None),
        (".tar.gz", Compression::Gzip),
        (".tgz", Compression::Gzip),
        (".tar.xz", Compression::Xz),
        (".tar.zst", Compression::Zstd),
        (".tar.bz2", Compression::Bzip2),
    ];
    SUFFIXES.into_iter().find(|(suffix, _)| name.ends_with(suffix)).map(|(_, c)| c)
}

/// Package archive layouts unpacked without external tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    /// Debian package: an `ar` archive whose `data.tar.*` holds the files.
    Deb,
    /// conda v2 package: a zip holding `pkg-*.tar.zst`.
    Conda,
    Zip,
    Tar(Compression),
}

impl ArchiveKind {
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".deb") {
            Some(ArchiveKind::Deb)
        } else if name.ends_with(".conda") {
            Some(ArchiveKind::Conda)
        } else if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            tar_compression(&name).map(ArchiveKind::Tar)
        }
    }
}

/// Joins an archive member name below `dest`. Absolute names and `..`
/// components are refused.
pub fn member_path(dest: &Path, name: &str) -> Result<PathBuf> {
    let mut out = dest.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!("archive member escapes the extraction directory: {name}")
            }
        }
    }
    Ok(out)
}

/// Unpacks a package archive into `dest` and returns the number of regular
/// files written. Links are skipped.
pub fn unpack(archive: &Path, dest: &Path) -> Result<usize> {
    let kind = ArchiveKind::detect(archive)
        .with_context(|| format!("not a package archive: {}", archive.display()))?;
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    let file = File::open(archive).with_context(|| format!("open {}", archive.display()))?;

    let written = match kind {
        ArchiveKind::Deb => unpack_deb(file, dest),
        ArchiveKind::Conda => unpack_conda(file, dest),
        ArchiveKind::Zip => unpack_zip(file, dest),
        ArchiveKind::Tar(compression) => unpack_tar(compression.decoder(BufReader::new(file))?, dest),
    }
    .with_context(|| format!("unpack {}", archive.display()))?;

    debug!(archive = %archive.display(), ?kind, files = written, "unpacked");
    Ok(written)
}

fn unpack_deb(file: File, dest: &Path) -> Result<usize> {
    let mut archive = ar::Archive::new(file);
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.context("read ar member")?;
        let name = String::from_utf8_lossy(entry.header().identifier()).trim_end_matches('/').to_string();
        if !name.starts_with("data.tar") {
            continue;
        }
        let compression = tar_compression(&name).with_context(|| format!("unsupported deb member {name}"))?;
        return unpack_tar(compression.decoder(&mut entry)?, dest);
    }
    bail!("no data.tar member")
}

fn unpack_conda(file: File, dest: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(file).context("read conda container")?;
    let mut written = None;
    for i in 0..archive.len() {
        let member = archive.by_index(i).context("read conda member")?;
        let name = member.name().to_string();
        if name.starts_with("pkg-") && name.ends_with(".tar.zst") {
            let count = unpack_tar(Compression::Zstd.decoder(member)?, dest).with_context(|| format!("unpack {name}"))?;
            *written.get_or_insert(0) += count;
        }
    }
    written.context("no pkg-*.tar.zst member")
}

fn unpack_zip(file: File, dest: &Path) -> Result<usize> {
    const S_IFMT: u32 = 0o170000;
    const S_IFLNK: u32 = 0o120000;

    let mut archive = zip::ZipArchive::new(file).context("read zip")?;
    let mut written = 0;
    for i in 0..archive.len() {
        let mut member = archive.by_index(i).context("read zip member")?;
        let name = member.name().to_string();
        if member.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            debug!(member = %name, "skipping link");
            continue;
        }
        let out = member_path(dest, &name)?;
        if member.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        write_member(&mut member, &out)?;
        written += 1;
    }
    Ok(written)
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<usize> {
    let mut archive = tar::Archive::new(reader);
    let mut written = 0;
    for entry in archive.entries().context("read tar")? {
        let mut entry = entry.context("read tar entry")?;
        let name = entry.path().context("tar entry name")?.to_string_lossy().into_owned();
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            debug!(member = %name, "skipping link");
            continue;
        }
        let out = member_path(dest, &name)?;
        if kind.is_dir() {
            fs::create_dir_all(&out).with_context(|| format!("create {}", out.display()))?;
        } else if kind.is_file() {
            write_member(&mut entry, &out)?;
            written += 1;
        }
    }
    Ok(written)
}

fn write_member(reader: &mut impl Read, out: &Path) -> Result<()> {
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut file = File::create(out).with_context(|| format!("create {}", out.display()))?;
    io::copy(reader, &mut file).with_context(|| format!("write {}", out.display()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    pub(crate) fn tar_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, data.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    pub(crate) fn write_deb(path: &Path, data_tar_gz: Vec<u8>) {
        let control = gzip(&tar_bytes(&[("./control", "Package: x\n")]));
        let mut builder = ar::Builder::new(File::create(path).unwrap());
        for (name, data) in [("debian-binary", b"2.0\n".to_vec()), ("control.tar.gz", control), ("data.tar.gz", data_tar_gz)] {
            let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
            builder.append(&header, data.as_slice()).unwrap();
        }
    }

    #[test]
    fn detects_archive_kinds() {
        let kind = |n: &str| ArchiveKind::detect(Path::new(n));
        assert_eq!(kind("/x/intel-oneapi-ccl_2021.17.2-5_amd64.deb"), Some(ArchiveKind::Deb));
        assert_eq!(kind("dal-2025.9.0-h1.conda"), Some(ArchiveKind::Conda));
        assert_eq!(kind("dal-2024.1.0-h1.tar.bz2"), Some(ArchiveKind::Tar(Compression::Bzip2)));
        assert_eq!(kind("build.TGZ"), Some(ArchiveKind::Tar(Compression::Gzip)));
        assert_eq!(kind("libdal.so.2"), None);
    }

    #[test]
    fn member_paths_stay_below_dest() {
        let dest = Path::new("/work/root");
        assert_eq!(member_path(dest, "./usr/lib/libx.so").unwrap(), dest.join("usr/lib/libx.so"));
        assert!(member_path(dest, "../etc/passwd").is_err());
        assert!(member_path(dest, "usr/../../x").is_err());
        assert!(member_path(dest, "/etc/passwd").is_err());
    }

    #[test]
    fn unpacks_deb_data_member() {
        let dir = tempdir().unwrap();
        let deb = dir.path().join("foo_1.0-1_amd64.deb");
        write_deb(&deb, gzip(&tar_bytes(&[("./usr/lib/libfoo.so.1.0", "\x7fELF"), ("./usr/include/foo.h", "int f();")])));

        let dest = dir.path().join("root");
        assert_eq!(unpack(&deb, &dest).unwrap(), 2);
        assert!(dest.join("usr/lib/libfoo.so.1.0").is_file());
        assert!(!dest.join("control").exists());
    }

    #[test]
    fn unpacks_conda_pkg_member() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foo-1.0-h1.conda");
        let pkg = zstd::encode_all(&tar_bytes(&[("lib/libfoo.so.1", "\x7fELF")])[..], 0).unwrap();
        let info = zstd::encode_all(&tar_bytes(&[("info/index.json", "{}")])[..], 0).unwrap();

        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in [("metadata.json", b"{}".to_vec()), ("info-foo-1.0-h1.tar.zst", info), ("pkg-foo-1.0-h1.tar.zst", pkg)] {
            zip.start_file(name, options).unwrap();
            zip.write_all(&data).unwrap();
        }
        zip.finish().unwrap();

        let dest = dir.path().join("root");
        assert_eq!(unpack(&path, &dest).unwrap(), 1);
        assert!(dest.join("lib/libfoo.so.1").is_file());
        assert!(!dest.join("info").exists());
    }

    #[test]
    fn skips_links_and_refuses_escapes() {
        let dir = tempdir().unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        builder.append_data(&mut header, "lib/libfoo.so.1", &b"\x7fELF"[..]).unwrap();
        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        builder.append_link(&mut link, "lib/libfoo.so", "libfoo.so.1").unwrap();
        let linked = dir.path().join("linked.tar.gz");
        fs::write(&linked, gzip(&builder.into_inner().unwrap())).unwrap();

        let dest = dir.path().join("linked");
        assert_eq!(unpack(&linked, &dest).unwrap(), 1);
        assert!(!dest.join("lib/libfoo.so").exists());

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_old();
        let name = b"../escape.so";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(3);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &b"ELF"[..]).unwrap();
        let hostile = dir.path().join("hostile.tar");
        fs::write(&hostile, builder.into_inner().unwrap()).unwrap();

        let err = unpack(&hostile, &dir.path().join("hostile")).unwrap_err();
        assert!(format!("{err:#}").contains("escapes"));
        assert!(!dir.path().join("escape.so").exists());
    }

    #[test]
    fn deb_without_data_is_an_error() {
        let dir = tempdir().unwrap();
        let deb = dir.path().join("empty.deb");
        let mut builder = ar::Builder::new(File::create(&deb).unwrap());
        builder.append(&ar::Header::new(b"debian-binary".to_vec(), 4), &b"2.0\n"[..]).unwrap();
        drop(builder);
        let err = unpack(&deb, &dir.path().join("root")).unwrap_err();
        assert!(format!("{err:#}").contains("no data.tar member"));
    }
}
