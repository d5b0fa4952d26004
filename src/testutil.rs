use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

/// Writes an executable shell script into `dir`.
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Could not write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Could not chmod script");
    path
}

/// Stand-in for `ffmpeg ... -i <in> ... <out>` that copies `<in>` to `<out>`.
/// Inputs whose name contains "bad" fail.
pub fn fake_remuxer(dir: &Path) -> PathBuf {
    script(
        dir,
        "ffmpeg",
        r#"prev=""; in=""
for a in "$@"; do
  if [ "$prev" = "-i" ]; then in="$a"; fi
  prev="$a"
done
case "$(basename "$in")" in *bad*) exit 1;; esac
cp "$in" "$prev""#,
    )
}

/// Sorted `(file name, contents)` pairs of a directory.
pub fn snapshot(dir: &Path) -> Vec<(String, String)> {
    let mut entries = std::fs::read_dir(dir)
        .expect("Could not list dir")
        .map(|e| {
            let e = e.expect("Could not read entry");
            (
                e.file_name().to_string_lossy().into_owned(),
                std::fs::read_to_string(e.path()).unwrap_or_default(),
            )
        })
        .collect::<Vec<_>>();
    entries.sort();
    entries
}
