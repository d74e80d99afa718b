//! Fieldmap reference and magnitude/phase inference.
//!
//! The reference anchor is a heuristic: a fieldmap is assumed to correct
//! whichever functional or anatomical block was acquired closest before it.
//! Results are marked with `heuristic_reference` so a caller can ask for
//! confirmation. Other category pairs are never anchored this way.

use bidsconv_core::{Category, Classification, FieldmapRole, ReferenceSpan, SeriesRecord};
use tracing::{debug, warn};

/// Position of the magnitude/phase flag in the image type values.
pub const ROLE_POSITION: usize = 2;
/// Image type value of a magnitude image.
pub const MAGNITUDE_SENTINEL: &str = "M";
/// Image type value of a phase image.
pub const PHASE_SENTINEL: &str = "P";

/// Infer reference spans and sub-roles for every active fieldmap.
///
/// `series` and `classes` are parallel slices in canonical order. Fieldmaps
/// that already carry a reference span keep it.
pub fn infer_pairs(series: &[SeriesRecord], classes: &mut [Classification]) {
    for i in 0..classes.len().min(series.len()) {
        if !is_active_fieldmap(&classes[i]) {
            continue;
        }

        if classes[i].resolved_reference().is_none() {
            match reference_anchor(classes, i) {
                Some(span) => {
                    debug!("Fieldmap {} anchored to series {}", i, span);
                    classes[i].reference_span = Some(span);
                    classes[i].heuristic_reference = true;
                }
                None => {
                    warn!("Fieldmap {} has no preceding functional or anatomical series", i);
                }
            }
        }

        assign_role(series, classes, i);
    }
}

fn is_active_fieldmap(c: &Classification) -> bool {
    c.category == Category::Fieldmap && !c.excluded
}

/// Closer of the nearest preceding functional and anatomical series,
/// widened to the contiguous block of that category ending at the anchor.
///
/// The scan runs over categories only; exclusion flags are ignored.
fn reference_anchor(classes: &[Classification], i: usize) -> Option<ReferenceSpan> {
    let nearest = |category: Category| (0..i).rev().find(|&j| classes[j].category == category);

    let anchor = match (nearest(Category::Functional), nearest(Category::Anatomical)) {
        (Some(f), Some(a)) => f.max(a),
        (Some(f), None) => f,
        (None, Some(a)) => a,
        (None, None) => return None,
    };

    let category = classes[anchor].category;
    let mut first = anchor;
    while first > 0 && classes[first - 1].category == category {
        first -= 1;
    }

    Some(ReferenceSpan::Range { first, last: anchor })
}

fn sentinel(series: &[SeriesRecord], i: usize) -> Option<&str> {
    series[i].image_type_at(ROLE_POSITION)
}

fn assign_role(series: &[SeriesRecord], classes: &mut [Classification], i: usize) {
    let current = sentinel(series, i);
    let paired_with_previous = i > 0
        && is_active_fieldmap(&classes[i - 1])
        && current.is_some()
        && sentinel(series, i - 1) == current;

    let (previous_role, role) = match current {
        Some(MAGNITUDE_SENTINEL) if paired_with_previous => {
            (Some(FieldmapRole::Magnitude1), FieldmapRole::Magnitude2)
        }
        Some(MAGNITUDE_SENTINEL) => (None, FieldmapRole::Magnitude),
        Some(PHASE_SENTINEL) if paired_with_previous => {
            (Some(FieldmapRole::Phase1), FieldmapRole::Phase2)
        }
        Some(PHASE_SENTINEL) => (None, FieldmapRole::PhaseDiff),
        _ => (None, FieldmapRole::Fieldmap),
    };

    if let Some(previous_role) = previous_role {
        set_role(&mut classes[i - 1], previous_role);
    }
    set_role(&mut classes[i], role);
}

fn set_role(c: &mut Classification, role: FieldmapRole) {
    c.fieldmap_role = Some(role);
    if role == FieldmapRole::Fieldmap {
        // Generic maps keep a rule label from the fieldmap vocabulary.
        if !Category::Fieldmap.accepts_label(&c.label) {
            c.label = role.label().to_string();
        }
    } else {
        c.label = role.label().to_string();
    }
}
