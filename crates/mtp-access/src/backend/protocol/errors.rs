//! Mapping mtp-rs errors into [`AccessError`].

use mtp_rs::ptp::ResponseCode;

use crate::error::AccessError;

/// True when the device says the object (or its parent) does not exist.
pub(super) fn is_missing_object(e: &mtp_rs::Error) -> bool {
    matches!(
        e,
        mtp_rs::Error::Protocol {
            code: ResponseCode::InvalidObjectHandle | ResponseCode::InvalidParentObject,
            ..
        }
    )
}

/// Maps mtp_rs errors to a backend failure naming the device.
pub(super) fn map_mtp_error(e: mtp_rs::Error, device: &str) -> AccessError {
    let message = match e {
        mtp_rs::Error::NoDevice => "device not found (it may have been unplugged)".to_string(),
        mtp_rs::Error::Disconnected => "device disconnected".to_string(),
        mtp_rs::Error::Timeout => "operation timed out".to_string(),
        mtp_rs::Error::Cancelled => "operation cancelled".to_string(),
        mtp_rs::Error::SessionNotOpen => "no open session".to_string(),
        mtp_rs::Error::Protocol { code, operation } => match code {
            ResponseCode::DeviceBusy => "device busy".to_string(),
            ResponseCode::StoreFull => "storage full".to_string(),
            ResponseCode::StoreReadOnly => "storage is read-only".to_string(),
            ResponseCode::InvalidObjectHandle | ResponseCode::InvalidParentObject => {
                format!("object not found (operation: {:?})", operation)
            }
            ResponseCode::AccessDenied => "access denied".to_string(),
            _ => format!("protocol error {:?} (operation: {:?})", code, operation),
        },
        mtp_rs::Error::InvalidData { message } => format!("invalid data from device: {}", message),
        mtp_rs::Error::Io(io_err) => format!("I/O error: {}", io_err),
        mtp_rs::Error::Usb(usb_err) => {
            let msg = usb_err.to_string();
            let lower = msg.to_lowercase();
            if lower.contains("exclusive access") || lower.contains("device or resource busy") {
                "another process has exclusive access (see evict_bus_users)".to_string()
            } else {
                format!("USB error: {}", msg)
            }
        }
    };
    AccessError::backend(format!("{device}: {message}"))
}
