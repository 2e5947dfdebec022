//! Unit tests for push-constant layout merging (no device required)

use super::*;

fn member(name: &str, offset: usize, size: usize) -> UniformMember {
    UniformMember {
        name: name.to_string(),
        offset,
        size,
    }
}

#[test]
fn test_merge_keeps_vertex_only_members() {
    let merged = merge_push_constants(vec![member("mvp", 0, 64)], Vec::new()).unwrap();
    assert_eq!(merged, vec![member("mvp", 0, 64)]);
}

#[test]
fn test_merge_adds_fragment_members_in_offset_order() {
    let merged = merge_push_constants(
        vec![member("mvp", 0, 64)],
        vec![member("tint", 80, 16), member("time", 64, 4)],
    )
    .unwrap();
    let names: Vec<&str> = merged.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["mvp", "time", "tint"]);
}

#[test]
fn test_merge_deduplicates_shared_members() {
    let merged = merge_push_constants(
        vec![member("mvp", 0, 64), member("tint", 64, 16)],
        vec![member("tint", 64, 16)],
    )
    .unwrap();
    assert_eq!(merged.len(), 2);
}

#[test]
fn test_merge_rejects_conflicting_offsets() {
    let result = merge_push_constants(vec![member("tint", 64, 16)], vec![member("tint", 0, 16)]);
    assert!(matches!(result, Err(Error::ShaderCompilation(_))));
}

#[test]
fn test_merge_rejects_conflicting_sizes() {
    let result = merge_push_constants(vec![member("color", 0, 12)], vec![member("color", 0, 16)]);
    assert!(matches!(result, Err(Error::ShaderCompilation(_))));
}

#[test]
fn test_merged_layout_beyond_capacity_is_rejected() {
    let merged = merge_push_constants(vec![member("mvp", 0, 64)], vec![member("extra", 120, 16)]).unwrap();
    assert!(UniformBlock::with_layout(merged).is_err());
}
