//! Tests for the breadth-first tree walker

use std::cell::Cell;
use std::collections::HashSet;

use crate::backend::virtual_device::VirtualDevice;
use crate::content::ContentKind;
use crate::test_support::{open_single, phone, with_tree};
use crate::walker::walk;

fn tree_device() -> VirtualDevice {
    with_tree(VirtualDevice::new("Phone", "ModelX", "SN123"), "Internal", 5, 3)
}

const TREE_DESCENDANTS: usize = 3 + 9 + 27 + 81 + 243;

#[test]
fn test_walk_single_file_storage() {
    let (_context, device) = open_single(phone());

    let entries: Vec<_> = walk(&device, "Phone_ModelX_SN123/Internal")
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "Phone_ModelX_SN123/Internal");
    assert!(entries[0].directories.is_empty());
    assert_eq!(entries[0].files.len(), 1);
    assert_eq!(entries[0].files[0].name(), "a.txt");
    assert_eq!(entries[0].files[0].size(), 10);
}

#[test]
fn test_walk_visits_every_descendant_once() {
    let (_context, device) = open_single(tree_device());

    let mut seen = HashSet::new();
    let mut total = 0;
    for entry in walk(&device, "Internal") {
        let entry = entry.unwrap();
        for node in entry.directories.iter().chain(&entry.files) {
            assert!(seen.insert(node.full_path().to_string()), "visited twice: {}", node.full_path());
            assert!(node.full_path().starts_with(&entry.path));
            total += 1;
        }
    }

    assert_eq!(total, TREE_DESCENDANTS);
}

#[test]
fn test_walk_is_breadth_first_and_sorted() {
    let (_context, device) = open_single(tree_device());

    let entries: Vec<_> = walk(&device, "Internal").map(|e| e.unwrap()).collect();

    let depths: Vec<usize> = entries.iter().map(|e| e.path.matches('/').count()).collect();
    let mut sorted_depths = depths.clone();
    sorted_depths.sort();
    assert_eq!(depths, sorted_depths, "levels must come out in order");

    let first = &entries[0];
    let names: Vec<&str> = first.directories.iter().map(|n| n.name()).collect();
    assert_eq!(names, vec!["d0", "d1", "d2"]);
    assert_eq!(entries[1].path, "Phone_ModelX_SN123/Internal/d0");
}

#[test]
fn test_walk_from_device_root_lists_storages_as_directories() {
    let device = VirtualDevice::new("Phone", "ModelX", "SN123")
        .with_storage("SD card")
        .with_file("Internal/a.txt", b"x".to_vec());
    let (_context, device) = open_single(device);

    let entries: Vec<_> = walk(&device, "Phone_ModelX_SN123").map(|e| e.unwrap()).collect();

    assert_eq!(entries[0].path, "Phone_ModelX_SN123");
    let storages: Vec<ContentKind> = entries[0].directories.iter().map(|n| n.kind()).collect();
    assert_eq!(storages, vec![ContentKind::Storage, ContentKind::Storage]);
    assert_eq!(entries.len(), 3);
}

#[test]
fn test_walk_missing_root_is_empty() {
    let (_context, device) = open_single(phone());

    let mut walker = walk(&device, "Internal/nope");
    assert!(walker.next().is_none());
    assert!(!walker.is_cancelled());
}

#[test]
fn test_walk_skips_undefined_entries() {
    let device = phone().with_undefined("Internal/mystery");
    let (_context, device) = open_single(device);

    let entry = walk(&device, "Internal").next().unwrap().unwrap();
    assert_eq!(entry.len(), 1);
    assert_eq!(entry.files[0].name(), "a.txt");
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancel_on_nth_visit_bounds_the_result() {
    let (_context, device) = open_single(tree_device());

    for n in [1usize, 5, 40, 200] {
        let visits = Cell::new(0usize);
        let mut walker = walk(&device, "Internal").on_visit(|_| {
            visits.set(visits.get() + 1);
            visits.get() < n
        });

        let mut yielded = 0;
        for entry in walker.by_ref() {
            yielded += entry.unwrap().len();
        }

        assert!(walker.is_cancelled());
        assert_eq!(visits.get(), n);
        assert!(yielded <= n, "yielded {yielded} with cancel at {n}");
        assert!(yielded < TREE_DESCENDANTS);
    }
}

#[test]
fn test_cancelled_walk_stays_finished() {
    let (_context, device) = open_single(tree_device());

    let mut walker = walk(&device, "Internal").on_visit(|_| false);
    assert!(walker.next().is_none());
    assert!(walker.next().is_none());
    assert!(walker.is_cancelled());
}

// ============================================================================
// Listing failures
// ============================================================================

#[test]
fn test_failure_without_callback_ends_the_walk() {
    let device = tree_device().with_failing_listing("Internal/d1");
    let (_context, device) = open_single(device);

    let results: Vec<_> = walk(&device, "Internal").collect();

    // root, d0, then the failure
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    let err = results[2].as_ref().unwrap_err();
    assert!(err.to_string().contains("Internal/d1"), "{err}");
}

#[test]
fn test_error_callback_true_skips_the_node() {
    let device = tree_device().with_failing_listing("Internal/d1");
    let (_context, device) = open_single(device);

    let errors = Cell::new(0);
    let mut total = 0;
    let mut walker = walk(&device, "Internal").on_error(|_| {
        errors.set(errors.get() + 1);
        true
    });
    for entry in walker.by_ref() {
        let entry = entry.unwrap();
        assert!(!entry.path.starts_with("Phone_ModelX_SN123/Internal/d1"));
        total += entry.len();
    }

    assert_eq!(errors.get(), 1);
    assert!(!walker.is_cancelled());
    // Everything below d1 (3 + 9 + 27 + 81 nodes) is unreachable.
    assert_eq!(total, TREE_DESCENDANTS - (3 + 9 + 27 + 81));
}

#[test]
fn test_error_callback_false_cancels() {
    let device = tree_device().with_failing_listing("Internal/d0");
    let (_context, device) = open_single(device);

    let mut walker = walk(&device, "Internal").on_error(|_| false);
    let results: Vec<_> = walker.by_ref().collect();

    assert_eq!(results.len(), 1, "only the root level is yielded");
    assert!(walker.is_cancelled());
}

#[test]
fn test_mid_listing_failure_discards_the_partial_level() {
    let device = tree_device().with_listing_failing_after("Internal", 2);
    let (_context, device) = open_single(device);

    let messages = std::cell::RefCell::new(Vec::new());
    let results: Vec<_> = walk(&device, "Internal")
        .on_error(|e| {
            messages.borrow_mut().push(e.to_string());
            true
        })
        .collect();

    assert!(results.is_empty());
    assert_eq!(messages.borrow().len(), 1);
    assert!(messages.borrow()[0].contains("connection lost"));
}
