//! Job folder layout and resource collection.
//!
//! A job folder follows a fixed convention:
//!
//! ```text
//! jobs/
//!   shared_job_resources/      (optional, shared by sibling jobs)
//!     glue_py_resources/
//!       github_zip_urls.txt
//!     glue_resources/
//!     glue_jars/
//!   my_job/
//!     job.py                   (required entry script)
//!     glue_py_resources/       (*.py, *.zip)
//!       github_zip_urls.txt    (one archive URL per line)
//!     glue_resources/          (*.sql, *.json, *.csv, *.txt)
//!     glue_jars/               (*.jar)
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::job::JobError;

const ENTRY_SCRIPT: &str = "job.py";
const PY_RESOURCE_DIR: &str = "glue_py_resources";
const RESOURCE_DIR: &str = "glue_resources";
const JAR_DIR: &str = "glue_jars";
const SHARED_DIR: &str = "shared_job_resources";
const ARCHIVE_URL_FILE: &str = "github_zip_urls.txt";

const PY_RESOURCE_EXTENSIONS: &[&str] = &["py", "zip"];
const RESOURCE_EXTENSIONS: &[&str] = &["sql", "json", "csv", "txt"];
const JAR_EXTENSIONS: &[&str] = &["jar"];

/// Everything collected from a job folder, ready for upload.
#[derive(Debug, Clone, Default)]
pub struct JobArtifacts {
    pub entry_script: PathBuf,
    pub py_resources: Vec<PathBuf>,
    pub resources: Vec<PathBuf>,
    pub jar_resources: Vec<PathBuf>,
    pub archive_urls: Vec<String>,
}

impl JobArtifacts {
    /// Every local file destined for upload, flat.
    pub fn local_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.py_resources
            .iter()
            .chain(self.resources.iter())
            .chain(self.jar_resources.iter())
    }
}

/// Scan a job folder (and optionally the sibling `shared_job_resources/`
/// folder) for the job's entry script and resources.
///
/// Listings are sorted so repeated scans of the same folder upload in the
/// same order.
pub fn scan_job_folder(folder: impl AsRef<Path>, include_shared: bool) -> Result<JobArtifacts, JobError> {
    let folder = folder.as_ref();
    let entry_script = folder.join(ENTRY_SCRIPT);
    if !entry_script.is_file() {
        return Err(JobError::MissingEntryScript {
            folder: folder.display().to_string(),
        });
    }

    let mut artifacts = JobArtifacts {
        entry_script,
        ..Default::default()
    };
    collect_from(folder, &mut artifacts)?;
    if include_shared {
        if let Some(shared) = folder.parent().map(|p| p.join(SHARED_DIR)) {
            if shared.is_dir() {
                collect_from(&shared, &mut artifacts)?;
            }
        }
    }
    artifacts.py_resources.sort();
    artifacts.resources.sort();
    artifacts.jar_resources.sort();
    artifacts.archive_urls.sort();
    Ok(artifacts)
}

fn collect_from(folder: &Path, artifacts: &mut JobArtifacts) -> Result<(), JobError> {
    artifacts
        .py_resources
        .extend(list_with_extensions(&folder.join(PY_RESOURCE_DIR), PY_RESOURCE_EXTENSIONS)?);
    artifacts
        .resources
        .extend(list_with_extensions(&folder.join(RESOURCE_DIR), RESOURCE_EXTENSIONS)?);
    artifacts
        .jar_resources
        .extend(list_with_extensions(&folder.join(JAR_DIR), JAR_EXTENSIONS)?);

    let url_file = folder.join(PY_RESOURCE_DIR).join(ARCHIVE_URL_FILE);
    if url_file.is_file() {
        let text = std::fs::read_to_string(&url_file)?;
        for line in text.lines() {
            let line = line.trim();
            // skips blank lines and stray junk
            if line.len() > 10 {
                artifacts.archive_urls.push(line.to_string());
            }
        }
    }
    Ok(())
}

fn list_with_extensions(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, JobError> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.contains(&e))
            .unwrap_or(false);
        if matches {
            out.push(path);
        }
    }
    Ok(out)
}

/// Reject resource sets where two files would land on the same basename.
///
/// Uploads flatten everything into one prefix, so basenames must be unique
/// across local files and downloaded archives alike.
pub fn check_nondup_resources<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), JobError> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    for name in names {
        *seen.entry(name.to_string()).or_insert(0) += 1;
    }
    let mut duplicates: Vec<String> =
        seen.into_iter().filter(|(_, n)| *n > 1).map(|(name, _)| name).collect();
    if duplicates.is_empty() {
        Ok(())
    } else {
        duplicates.sort();
        Err(JobError::DuplicateResourceName {
            names: duplicates.join(", "),
        })
    }
}

/// Derive the repository name from an archive URL such as
/// `https://github.com/org/repo/archive/main.zip`.
pub fn archive_repo_name(url: &str) -> Result<&str, JobError> {
    let trimmed = url.trim_end_matches('/');
    let mut segments = trimmed.split('/').rev();
    let _file = segments.next();
    let archive = segments.next();
    let repo = segments.next();
    match (archive, repo) {
        (Some("archive"), Some(repo)) if !repo.is_empty() => Ok(repo),
        _ => Err(JobError::Download(format!("cannot parse archive url: {url}"))),
    }
}

/// Download a repository archive and re-zip it so the package directory sits
/// at the archive root under the plain repository name (archives come back
/// with a `repo-branch/` wrapper directory).
///
/// Returns the path of the rewritten zip inside `dest`.
pub async fn download_and_unnest(url: &str, dest: &Path) -> Result<PathBuf, JobError> {
    let repo = archive_repo_name(url)?;
    info!(%url, "downloading archive");
    let response = reqwest::get(url)
        .await
        .map_err(|e| JobError::Download(e.to_string()))?
        .error_for_status()
        .map_err(|e| JobError::Download(e.to_string()))?;
    let body = response
        .bytes()
        .await
        .map_err(|e| JobError::Download(e.to_string()))?;

    let scratch = tempfile::tempdir()?;
    let downloaded = scratch.path().join("archive.zip");
    std::fs::write(&downloaded, &body)?;

    let out_path = dest.join(format!("{repo}.zip"));
    rezip_without_wrapper(&downloaded, &out_path, repo)?;
    Ok(out_path)
    // scratch dropped here, temp files removed
}

/// Rewrite `source` into `dest`, replacing the single top-level wrapper
/// directory in every entry path with `root_name`.
fn rezip_without_wrapper(source: &Path, dest: &Path, root_name: &str) -> Result<(), JobError> {
    let mut archive =
        ZipArchive::new(File::open(source)?).map_err(|e| JobError::Archive(e.to_string()))?;
    let mut writer = ZipWriter::new(File::create(dest)?);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| JobError::Archive(e.to_string()))?;
        let name = entry.name().to_string();
        let rewritten = match name.split_once('/') {
            Some((_wrapper, rest)) if !rest.is_empty() => format!("{root_name}/{rest}"),
            _ => continue,
        };
        if entry.is_dir() {
            writer
                .add_directory(rewritten, options)
                .map_err(|e| JobError::Archive(e.to_string()))?;
        } else {
            writer
                .start_file(rewritten, options)
                .map_err(|e| JobError::Archive(e.to_string()))?;
            let mut buffer = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buffer)?;
            writer.write_all(&buffer)?;
        }
    }
    writer.finish().map_err(|e| JobError::Archive(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    fn build_job_folder(root: &Path) -> PathBuf {
        let job = root.join("my_job");
        touch(&job.join("job.py"));
        touch(&job.join("glue_py_resources/helpers.py"));
        touch(&job.join("glue_py_resources/utils.zip"));
        touch(&job.join("glue_py_resources/notes.md"));
        touch(&job.join("glue_resources/lookup.csv"));
        touch(&job.join("glue_jars/custom.jar"));
        std::fs::write(
            job.join("glue_py_resources/github_zip_urls.txt"),
            "https://github.com/org/repo/archive/main.zip\nshort\n",
        )
        .unwrap();
        job
    }

    #[test]
    fn test_scan_collects_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let job = build_job_folder(tmp.path());
        let artifacts = scan_job_folder(&job, true).unwrap();
        assert!(artifacts.entry_script.ends_with("job.py"));
        assert_eq!(artifacts.py_resources.len(), 2);
        assert_eq!(artifacts.resources.len(), 1);
        assert_eq!(artifacts.jar_resources.len(), 1);
        assert_eq!(
            artifacts.archive_urls,
            vec!["https://github.com/org/repo/archive/main.zip"]
        );
    }

    #[test]
    fn test_scan_merges_shared_resources() {
        let tmp = tempfile::tempdir().unwrap();
        let job = build_job_folder(tmp.path());
        touch(&tmp.path().join("shared_job_resources/glue_py_resources/shared.py"));
        let artifacts = scan_job_folder(&job, true).unwrap();
        assert_eq!(artifacts.py_resources.len(), 3);
        let without = scan_job_folder(&job, false).unwrap();
        assert_eq!(without.py_resources.len(), 2);
    }

    #[test]
    fn test_missing_entry_script() {
        let tmp = tempfile::tempdir().unwrap();
        let job = tmp.path().join("empty_job");
        std::fs::create_dir_all(&job).unwrap();
        assert!(matches!(
            scan_job_folder(&job, true),
            Err(JobError::MissingEntryScript { .. })
        ));
    }

    #[test]
    fn test_duplicate_basenames_rejected() {
        let names = ["utils.zip", "helpers.py", "utils.zip"];
        let err = check_nondup_resources(names.into_iter()).unwrap_err();
        assert!(matches!(err, JobError::DuplicateResourceName { names } if names == "utils.zip"));
        check_nondup_resources(["a.py", "b.py"].into_iter()).unwrap();
    }

    #[test]
    fn test_archive_repo_name() {
        assert_eq!(
            archive_repo_name("https://github.com/org/my-lib/archive/main.zip").unwrap(),
            "my-lib"
        );
        assert!(archive_repo_name("https://example.com/file.zip").is_err());
    }

    #[test]
    fn test_rezip_replaces_wrapper_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source.zip");
        {
            let mut writer = ZipWriter::new(File::create(&source).unwrap());
            let options = SimpleFileOptions::default();
            writer.add_directory("my-lib-main/", options).unwrap();
            writer.start_file("my-lib-main/mod.py", options).unwrap();
            writer.write_all(b"print('hi')").unwrap();
            writer.finish().unwrap();
        }
        let dest = tmp.path().join("my-lib.zip");
        rezip_without_wrapper(&source, &dest, "my-lib").unwrap();

        let mut archive = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"my-lib/mod.py".to_string()));
    }
}
