//! Item identity derived from heterogeneous file names and design ids.
//!
//! The same logical item shows up under several file names across stages
//! (`tee_cid_42.png`, `renders/tee_cid_42_bg_removed.webp`, ...). Keys are
//! case-folded so those spellings collapse to one timeline.

use std::sync::LazyLock;

use regex::Regex;

/// `_palette_id_<n>_flavor_<m>`: one design; several files may share it.
static DESIGN_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_palette_id_(\d+)_flavor_(\d+)").expect("static regex")
});

/// `<prefix>_cid_<id>`: one uploaded source file.
static CONTENT_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z0-9-]+)_cid_([a-z0-9-]+)").expect("static regex")
});

/// Canonical key for an `image_update` file name.
///
/// A design segment wins over the content segment. Returns `None` when the
/// name carries neither.
pub fn item_key_for_file(file_name: &str) -> Option<String> {
    let base = basename(file_name).to_ascii_lowercase();
    design_segment(&base).or_else(|| content_segment(&base))
}

/// Canonical key for a `design_ready` id. Ids without a recognizable segment
/// are used as-is after trimming and case-folding; an empty id yields `None`.
pub fn design_key(design_id: &str) -> Option<String> {
    let folded = design_id.trim().to_ascii_lowercase();
    if folded.is_empty() {
        return None;
    }
    let key = design_segment(&folded)
        .or_else(|| content_segment(&folded))
        .unwrap_or(folded);
    Some(key)
}

fn basename(path: &str) -> &str {
    let trimmed = path.trim();
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
}

fn design_segment(text: &str) -> Option<String> {
    let caps = DESIGN_SEGMENT.captures(text)?;
    Some(format!("palette_id_{}_flavor_{}", &caps[1], &caps[2]))
}

fn content_segment(text: &str) -> Option<String> {
    let caps = CONTENT_SEGMENT.captures(text)?;
    Some(format!("{}_cid_{}", &caps[1], &caps[2]))
}
