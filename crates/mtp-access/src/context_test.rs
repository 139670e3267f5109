//! Tests for the backend context, enumeration, and the device lifecycle

use crate::backend::BackendKind;
use crate::backend::virtual_device::VirtualDevice;
use crate::context::BackendContext;
use crate::test_support::{init_logging, open_single, phone};

#[test]
fn test_two_devices_with_distinct_serials() {
    init_logging();
    let first = VirtualDevice::new("Phone", "ModelX", "SN123").with_storage("Internal");
    let second = VirtualDevice::new("Tablet", "TabY", "SN456").with_storage("Internal");
    let mut context = BackendContext::virtual_devices(vec![first, second]);

    let devices = context.enumerate().unwrap();

    assert_eq!(devices.len(), 2);
    assert_ne!(devices[0].serial_number(), devices[1].serial_number());
    assert_eq!(context.open_device_count(), 2);
    assert!(devices.iter().all(|d| d.backend() == BackendKind::Virtual));
}

#[test]
fn test_not_ready_devices_are_omitted_and_released() {
    init_logging();
    let ready = phone();
    let no_storage = VirtualDevice::new("Booting", "ModelZ", "SN000");
    let unreadable = VirtualDevice::new("Locked", "ModelW", "SN999")
        .with_storage("Internal")
        .with_unreadable_storages();
    let mut context = BackendContext::virtual_devices(vec![no_storage.clone(), ready, unreadable.clone()]);

    let devices = context.enumerate().unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].composite_name(), "Phone_ModelX_SN123");
    assert_eq!(no_storage.close_count(), 1);
    assert_eq!(unreadable.close_count(), 1);
    assert_eq!(context.open_device_count(), 1);
}

#[test]
fn test_no_devices_is_not_an_error() {
    let mut context = BackendContext::virtual_devices(Vec::new());
    assert!(context.enumerate().unwrap().is_empty());
    assert!(context.is_initialized());
}

#[test]
fn test_initialization_is_lazy() {
    let mut context = BackendContext::virtual_devices(vec![phone()]);
    assert!(!context.is_initialized());
    let _devices = context.enumerate().unwrap();
    assert!(context.is_initialized());
}

#[test]
fn test_close_is_idempotent() {
    let phone = phone();
    let (context, mut device) = open_single(phone.clone());

    device.close().unwrap();
    device.close().unwrap();

    assert!(device.is_closed());
    assert_eq!(phone.close_count(), 1);
    assert_eq!(context.open_device_count(), 0);
}

#[test]
fn test_drop_closes_the_device() {
    let phone = phone();
    let (context, device) = open_single(phone.clone());

    drop(device);

    assert_eq!(phone.close_count(), 1);
    assert_eq!(context.open_device_count(), 0);
}

#[test]
fn test_closed_device_and_its_nodes_fail() {
    let (_context, mut device) = open_single(phone());
    let storage = device.get_path("Internal").unwrap().unwrap();
    let file = device.get_path("Internal/a.txt").unwrap().unwrap();

    device.close().unwrap();

    let err = device.get_content().unwrap_err();
    assert!(err.to_string().contains("is closed"), "{err}");
    assert!(storage.get_children().is_err());
    assert!(storage.create_content("new").is_err());
    assert!(file.download_stream(&mut Vec::new(), None).is_err());
    // Accessors still answer from the node value.
    assert_eq!(file.size(), 10);
}

#[test]
fn test_shutdown_refused_while_devices_are_open() {
    let (mut context, mut device) = open_single(phone());

    let err = context.shutdown().unwrap_err();
    assert!(err.to_string().contains("1 device(s) still open"), "{err}");
    assert!(context.is_initialized());

    device.close().unwrap();
    context.shutdown().unwrap();
    context.shutdown().unwrap();
    assert!(!context.is_initialized());
}

#[test]
fn test_context_is_unusable_after_shutdown() {
    let mut context = BackendContext::virtual_devices(vec![phone()]);
    context.shutdown().unwrap();

    let err = context.enumerate().unwrap_err();
    assert!(err.to_string().contains("shut down"), "{err}");
}

#[test]
fn test_enumeration_sees_changes_between_calls() {
    let phone = phone();
    let (mut context, mut device) = open_single(phone.clone());
    device.close().unwrap();

    let again = context.enumerate().unwrap();
    assert_eq!(again.len(), 1);
    assert!(again[0].exists("Internal/a.txt").unwrap());
}

#[test]
fn test_eviction_needs_the_protocol_backend() {
    let mut context = BackendContext::virtual_devices(vec![phone()]);
    let err = context.evict_bus_users().unwrap_err();
    assert!(err.to_string().contains("not supported by the virtual backend"), "{err}");
}
