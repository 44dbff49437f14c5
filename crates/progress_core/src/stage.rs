/// Label shown for stages the table does not know about.
pub const DEFAULT_STAGE_LABEL: &str = "Processing";
pub const DEFAULT_STAGE_COLOR: &str = "#9E9E9E";

// (stage, label, color)
const STAGES: &[(&str, &str, &str)] = &[
    ("uploaded", "Upload received", "#607D8B"),
    ("validated", "Artwork validated", "#00BCD4"),
    ("background_removed", "Background removed", "#03A9F4"),
    ("upscaled", "Upscaled", "#3F51B5"),
    ("vectorized", "Vectorized", "#9C27B0"),
    ("palette_applied", "Palette applied", "#FF9800"),
    ("flavor_applied", "Style applied", "#E91E63"),
    ("mockup_rendered", "Mockup rendered", "#8BC34A"),
    ("finalized", "Ready", "#4CAF50"),
];

fn lookup(stage: &str) -> Option<&'static (&'static str, &'static str, &'static str)> {
    let stage = stage.trim();
    STAGES
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(stage))
}

/// Display label for a stage name; never fails.
pub fn stage_label(stage: &str) -> &'static str {
    lookup(stage).map_or(DEFAULT_STAGE_LABEL, |&(_, label, _)| label)
}

pub fn stage_color(stage: &str) -> &'static str {
    lookup(stage).map_or(DEFAULT_STAGE_COLOR, |&(_, _, color)| color)
}

#[cfg(test)]
mod tests {
    use super::{stage_color, stage_label, DEFAULT_STAGE_COLOR, DEFAULT_STAGE_LABEL};

    #[test]
    fn known_stage_maps_to_label_and_color() {
        assert_eq!(stage_label("background_removed"), "Background removed");
        assert_eq!(stage_color("background_removed"), "#03A9F4");
    }

    #[test]
    fn lookup_ignores_case_and_padding() {
        assert_eq!(stage_label("  Upscaled "), "Upscaled");
    }

    #[test]
    fn unmapped_stage_falls_back() {
        assert_eq!(stage_label("teleported"), DEFAULT_STAGE_LABEL);
        assert_eq!(stage_color("teleported"), DEFAULT_STAGE_COLOR);
        assert_eq!(stage_label(""), DEFAULT_STAGE_LABEL);
    }
}
