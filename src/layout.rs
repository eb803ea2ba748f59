use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::domain::{APP_EXTENSION, H3_EXTENSION, TitleId};
use crate::error::NusError;

pub const ORGANIZED_TMD_NAME: &str = "title.tmd";

#[derive(Debug, Clone)]
pub struct OrganizeResult {
    pub title_dir: Utf8PathBuf,
    pub moved: usize,
    pub manifest_moved: bool,
    pub ticket_attached: bool,
}

pub fn title_dir(title: &TitleId, download_dir: &Utf8Path) -> Utf8PathBuf {
    download_dir.join(title.as_str())
}

/// Moves the title's artifacts into `{download_dir}/{titleid}/` and copies its ticket, if any.
///
/// The blob scan is flat: every `.app`/`.h3` directly under `download_dir` is moved. A missing
/// ticket is reported through `ticket_attached`, never as an error.
pub fn organize(
    title: &TitleId,
    download_dir: &Utf8Path,
    ticket_dir: &Utf8Path,
) -> Result<OrganizeResult, NusError> {
    let dest = title_dir(title, download_dir);
    fs::create_dir_all(dest.as_std_path())
        .map_err(|err| NusError::Filesystem(format!("create {dest}: {err}")))?;

    let mut moved = 0usize;
    let entries = fs::read_dir(download_dir.as_std_path())
        .map_err(|err| NusError::Filesystem(format!("read {download_dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| NusError::Filesystem(err.to_string()))?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|_| NusError::Filesystem("non-utf8 file path in download dir".to_string()))?;
        if !path.is_file() || !is_artifact(&path) {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        move_file(&path, &dest.join(name))?;
        moved += 1;
    }

    let manifest = download_dir.join(title.manifest_file_name());
    let manifest_moved = manifest.is_file();
    if manifest_moved {
        move_file(&manifest, &dest.join(ORGANIZED_TMD_NAME))?;
    }

    let ticket = ticket_dir.join(title.ticket_file_name());
    let ticket_attached = if ticket.is_file() {
        fs::copy(ticket.as_std_path(), dest.join(title.ticket_file_name()).as_std_path())
            .map_err(|err| NusError::Filesystem(format!("copy {ticket}: {err}")))?;
        info!(%ticket, dest = %dest, "copied ticket");
        true
    } else {
        warn!(%ticket, "ticket not found");
        false
    };

    Ok(OrganizeResult {
        title_dir: dest,
        moved,
        manifest_moved,
        ticket_attached,
    })
}

fn is_artifact(path: &Utf8Path) -> bool {
    matches!(path.extension(), Some(APP_EXTENSION) | Some(H3_EXTENSION))
}

fn move_file(from: &Utf8Path, to: &Utf8Path) -> Result<(), NusError> {
    match fs::rename(from.as_std_path(), to.as_std_path()) {
        Ok(()) => Ok(()),
        // rename fails across filesystems
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(from.as_std_path(), to.as_std_path())
                .and_then(|_| fs::remove_file(from.as_std_path()))
                .map_err(|err| NusError::Filesystem(format!("move {from}: {err}")))
        }
        Err(err) => Err(NusError::Filesystem(format!("move {from}: {err}"))),
    }
}
