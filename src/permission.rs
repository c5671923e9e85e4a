//! Camera access checks.
//!
//! There is no runtime permission dialog on Linux. Access to a V4L2 device is
//! governed by file permissions on `/dev/video*`, so the "permission request"
//! probes whether any capture device can actually be opened.

use std::io;

use log::debug;

/// Why camera access is unavailable.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    /// Devices exist, but opening every one of them was denied.
    ///
    /// Typically means the user is not in the `video` group.
    #[error("access to all video devices was denied")]
    Denied,
    /// No video capture device is attached.
    #[error("no video capture device found")]
    NoDevice,
    /// Probing failed for an unrelated reason.
    #[error("failed to probe video devices: {0}")]
    Io(#[from] io::Error),
}

/// Checks that at least one video device can be opened.
///
/// Returns `Ok` as soon as one device is accessible. The capture pipeline must
/// not be started when this fails.
pub fn request_camera() -> Result<(), PermissionError> {
    let probes = linuxvideo::list()?
        .map(|res| {
            res.and_then(|device| {
                let caps = device.capabilities()?;
                debug!("probed video device: {}", caps.card());
                Ok(())
            })
        })
        .collect();
    evaluate(probes)
}

/// Folds per-device probe results into a single decision.
///
/// Any accessible device grants access. With no accessible device, a denied
/// probe wins over other errors since it is the actionable one.
fn evaluate(probes: Vec<io::Result<()>>) -> Result<(), PermissionError> {
    if probes.is_empty() {
        return Err(PermissionError::NoDevice);
    }
    let mut fallback = None;
    for probe in probes {
        match probe {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                fallback = Some(PermissionError::Denied);
            }
            Err(e) => {
                if !matches!(fallback, Some(PermissionError::Denied)) {
                    fallback = Some(PermissionError::Io(e));
                }
            }
        }
    }
    Err(fallback.expect("probes is non-empty"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied() -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn broken() -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::InvalidData))
    }

    #[test]
    fn no_devices() {
        assert!(matches!(evaluate(Vec::new()), Err(PermissionError::NoDevice)));
    }

    #[test]
    fn one_accessible_device_grants_access() {
        assert!(evaluate(vec![denied(), Ok(()), broken()]).is_ok());
    }

    #[test]
    fn all_denied() {
        assert!(matches!(
            evaluate(vec![denied(), denied()]),
            Err(PermissionError::Denied)
        ));
    }

    #[test]
    fn denied_wins_over_other_errors() {
        assert!(matches!(
            evaluate(vec![broken(), denied()]),
            Err(PermissionError::Denied)
        ));
        assert!(matches!(
            evaluate(vec![denied(), broken()]),
            Err(PermissionError::Denied)
        ));
    }

    #[test]
    fn other_errors_surface_when_nothing_is_denied() {
        assert!(matches!(
            evaluate(vec![broken()]),
            Err(PermissionError::Io(_))
        ));
    }
}
