use log::{debug, info};

use crate::content::{ContentKind, ContentNode, path};
use crate::device::Device;
use crate::error::AccessError;

/// Makes sure every directory of `dir_path` exists and returns the last one.
///
/// `dir_path` is `[composite name/]storage/seg/...`; the storage must already exist. Segments
/// that exist are descended into, missing ones are created, so a second call with the same
/// path creates nothing. A file in the way fails with `AlreadyExists`.
pub fn makedirs(device: &Device, dir_path: &str) -> Result<ContentNode, AccessError> {
    let mut segments = path::segments(dir_path);
    path::strip_leading(&mut segments, device.composite_name());

    let Some((storage_name, rest)) = segments.split_first() else {
        return Err(AccessError::backend(format!("no storage in path '{dir_path}'")));
    };

    let mut current = device
        .root()
        .get_child(storage_name)?
        .filter(|node| node.kind() == ContentKind::Storage)
        .ok_or_else(|| {
            AccessError::backend(format!(
                "storage {} not found on {}",
                storage_name,
                device.composite_name()
            ))
        })?;

    let mut created = 0;
    for segment in rest {
        current = match current.get_child(segment)? {
            Some(child) if child.kind().accepts_content() => child,
            Some(child) => return Err(AccessError::already_exists(child.full_path())),
            None => {
                created += 1;
                current.create_content(segment)?
            }
        };
    }

    if created > 0 {
        info!("Created {} director(ies) for {}", created, current.full_path());
    } else {
        debug!("{} already exists", current.full_path());
    }
    Ok(current)
}
