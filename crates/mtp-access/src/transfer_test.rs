//! Tests for uploading and downloading through content nodes

use std::cell::RefCell;
use std::fs;
use std::io::Cursor;

use crate::backend::virtual_device::VirtualDevice;
use crate::test_support::{open_single, phone};

fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_upload_then_download_round_trip() {
    let phone = phone();
    let (_context, device) = open_single(phone.clone());
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.bin");
    let destination = dir.path().join("copy.bin");
    fs::write(&source, sample_bytes(1000)).unwrap();

    let internal = device.get_path("Internal").unwrap().unwrap();
    assert_eq!(internal.upload_file("data.bin", &source).unwrap(), 1000);

    let uploaded = internal.get_child("data.bin").unwrap().unwrap();
    assert_eq!(uploaded.size(), 1000);
    assert_eq!(uploaded.download_file(&destination).unwrap(), 1000);

    assert_eq!(fs::read(&destination).unwrap(), fs::read(&source).unwrap());
    assert_eq!(fs::metadata(&destination).unwrap().len(), 1000);
    assert_eq!(phone.file_contents("Internal/data.bin"), Some(sample_bytes(1000)));
}

#[test]
fn test_upload_overwrites_existing_file() {
    let phone = phone();
    let (_context, device) = open_single(phone.clone());
    let internal = device.get_path("Internal").unwrap().unwrap();

    let replacement = b"replaced!".to_vec();
    internal
        .upload_stream("a.txt", &mut Cursor::new(replacement.clone()), replacement.len() as u64, None)
        .unwrap();

    assert_eq!(phone.file_contents("Internal/a.txt"), Some(replacement));
    let names: Vec<String> = internal
        .get_children()
        .unwrap()
        .map(|c| c.unwrap().name().to_string())
        .collect();
    assert_eq!(names, vec!["a.txt"]);
}

#[test]
fn test_download_overwrites_local_file() {
    let (_context, device) = open_single(phone());
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("a.txt");
    fs::write(&destination, vec![b'z'; 4096]).unwrap();

    let file = device.get_path("Internal/a.txt").unwrap().unwrap();
    file.download_file(&destination).unwrap();

    assert_eq!(fs::read(&destination).unwrap(), b"0123456789");
}

#[test]
fn test_upload_onto_directory_is_already_exists() {
    let device = phone().with_directory("Internal/DCIM");
    let (_context, device) = open_single(device);
    let internal = device.get_path("Internal").unwrap().unwrap();

    let err = internal
        .upload_stream("DCIM", &mut Cursor::new(b"x".to_vec()), 1, None)
        .unwrap_err();
    assert!(err.is_already_exists());
}

#[test]
fn test_transfers_check_node_kinds() {
    let (_context, device) = open_single(phone());
    let internal = device.get_path("Internal").unwrap().unwrap();
    let file = device.get_path("Internal/a.txt").unwrap().unwrap();

    let err = internal.download_stream(&mut Vec::new(), None).unwrap_err();
    assert!(err.to_string().contains("is not a file"), "{err}");

    let err = file.upload_stream("child", &mut Cursor::new(Vec::new()), 0, None).unwrap_err();
    assert!(err.to_string().contains("not a storage or directory"), "{err}");
}

#[test]
fn test_missing_local_source_fails_before_touching_the_device() {
    let phone = phone();
    let (_context, device) = open_single(phone.clone());
    let internal = device.get_path("Internal").unwrap().unwrap();

    let err = internal.upload_file("ghost.bin", "/nonexistent/ghost.bin").unwrap_err();

    assert!(err.to_string().contains("cannot open"), "{err}");
    assert!(!phone.contains("Internal/ghost.bin"));
}

#[test]
fn test_progress_reports_running_totals() {
    let device = VirtualDevice::new("Phone", "ModelX", "SN123").with_file("Internal/big.bin", sample_bytes(5000));
    let (_context, device) = open_single(device);
    let file = device.get_path("Internal/big.bin").unwrap().unwrap();

    let reports = RefCell::new(Vec::new());
    let progress = |done: u64, total: u64| reports.borrow_mut().push((done, total));
    let mut sink = Vec::new();
    file.download_stream(&mut sink, Some(&progress)).unwrap();

    let reports = reports.into_inner();
    assert!(!reports.is_empty());
    assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(reports.last(), Some(&(5000, 5000)));
    assert_eq!(sink.len(), 5000);
}

#[test]
fn test_removed_node_cannot_transfer() {
    let (_context, device) = open_single(phone());
    let mut file = device.get_path("Internal/a.txt").unwrap().unwrap();
    file.remove().unwrap();

    let err = file.download_stream(&mut Vec::new(), None).unwrap_err();
    assert!(err.to_string().contains("has been removed"), "{err}");
}
