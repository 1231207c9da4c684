//! Property tests for the ordering and sanitisation invariants.

use proptest::prelude::*;

use host_triage::catalogue::spec::ArtifactSpec;
use host_triage::catalogue::Catalogue;
use host_triage::config::CollectionProfile;
use host_triage::security::path::safe_file_name;

fn arbitrary_specs() -> impl Strategy<Value = Vec<ArtifactSpec>> {
    prop::collection::vec((1u8..=5, any::<bool>()), 0..24).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(index, (priority, volatile))| {
                let spec = ArtifactSpec::command(&format!("spec_{:02}", index), "generated")
                    .with_priority(priority);
                if volatile {
                    spec.volatile()
                } else {
                    spec
                }
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn selection_orders_volatile_first_then_priority_then_name(specs in arbitrary_specs()) {
        let catalogue = Catalogue::build(specs).unwrap();
        let selected = catalogue.select(
            &CollectionProfile::extended(),
            host_triage::catalogue::spec::Platform::Any,
        );

        // once a non-volatile spec appears, no volatile spec may follow
        let first_stable = selected.iter().position(|s| !s.volatile);
        if let Some(boundary) = first_stable {
            prop_assert!(selected[boundary..].iter().all(|s| !s.volatile));
        }

        // each phase is sorted by (priority, name)
        for window in selected.windows(2) {
            if window[0].volatile == window[1].volatile {
                prop_assert!(window[0].order_key() <= window[1].order_key());
            }
        }
    }

    #[test]
    fn safe_file_name_is_idempotent_and_safe(name in ".{0,64}") {
        let once = safe_file_name(&name);
        prop_assert!(!once.is_empty());
        prop_assert!(!once.starts_with('.'));
        for c in ['<', '>', ':', '"', '|', '?', '*', '/', '\\'] {
            prop_assert!(!once.contains(c));
        }
        prop_assert_eq!(safe_file_name(&once), once.clone());
    }
}
