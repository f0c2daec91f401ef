//! Tests for DeviceShadow allocation, binding and dispatch

use super::*;
use crate::matcher::{BasicMatcher, ControlMatcher};
use crate::pattern::EventPattern;
use crate::shadow::{Color, RecordingSink};
use crate::surface::{ControlKind, ControlSurface, Coordinate};
use serde_json::json;

/// Collects handled events
#[derive(Default)]
struct Target {
    hits: Vec<(String, f32, BindArgs)>,
}

fn record(event: &mut ShadowEvent<'_>, target: &mut Target, args: &BindArgs) -> bool {
    target
        .hits
        .push((event.shadow.name().to_string(), event.value(), args.clone()));
    true
}

fn fader(name: &str, cc: u8, group: &str, row: u16, col: u16) -> ControlSurface {
    ControlSurface::new(name, ControlKind::Fader, EventPattern::control_change(cc, None))
        .in_group(group)
        .at(row, col)
}

/// Group A: 4 faders on row 0, group B: 2 faders on row 1
fn two_banks() -> BasicMatcher {
    let mut matcher = BasicMatcher::new();
    for col in 0..4 {
        matcher.add_control(fader(&format!("a{}", col), col as u8, "A", 0, col));
    }
    for col in 0..2 {
        matcher.add_control(fader(&format!("b{}", col), 10 + col as u8, "B", 1, col));
    }
    matcher
}

fn coords(page: &DeviceShadow<Target>, mappings: &[ControlMapping]) -> Vec<Coordinate> {
    mappings
        .iter()
        .map(|m| page.shadow(*m).unwrap().coordinate())
        .collect()
}

#[test]
fn test_smallest_sufficient_group_wins() {
    let matcher = two_banks();
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let matches = page
        .control_matches(&MatchRequest::new(ControlKind::Fader).target(2))
        .unwrap();

    assert_eq!(
        coords(&page, &matches),
        vec![Coordinate::new(1, 0), Coordinate::new(1, 1)]
    );
}

#[test]
fn test_largest_group_without_target() {
    let matcher = two_banks();
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let matches = page
        .control_matches(&MatchRequest::new(ControlKind::Fader))
        .unwrap();
    assert_eq!(matches.len(), 4);
    assert!(matches
        .iter()
        .all(|m| page.shadow(*m).unwrap().group() == "A"));
}

#[test]
fn test_falls_back_to_largest_group_when_none_suffices() {
    let matcher = two_banks();
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let matches = page
        .control_matches(&MatchRequest::new(ControlKind::Fader).target(6).exact(false))
        .unwrap();
    assert_eq!(matches.len(), 4);
    assert_eq!(page.shadow(matches[0]).unwrap().group(), "A");
}

#[test]
fn test_tie_goes_to_first_encountered_group() {
    let matcher = BasicMatcher::new()
        .with_control(fader("z0", 1, "zeta", 5, 0))
        .with_control(fader("a0", 2, "alpha", 0, 0))
        .with_control(fader("z1", 3, "zeta", 5, 1))
        .with_control(fader("a1", 4, "alpha", 0, 1));
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let all = page
        .control_matches(&MatchRequest::new(ControlKind::Fader))
        .unwrap();
    assert_eq!(page.shadow(all[0]).unwrap().group(), "zeta");

    let two = page
        .control_matches(&MatchRequest::new(ControlKind::Fader).target(2))
        .unwrap();
    assert_eq!(page.shadow(two[0]).unwrap().group(), "zeta");
}

#[test]
fn test_results_sorted_row_major() {
    let matcher = BasicMatcher::new()
        .with_control(fader("f3", 1, "g", 1, 0))
        .with_control(fader("f2", 2, "g", 0, 2))
        .with_control(fader("f1", 3, "g", 0, 0));
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let matches = page
        .control_matches(&MatchRequest::new(ControlKind::Fader))
        .unwrap();
    let names: Vec<&str> = matches
        .iter()
        .map(|m| page.shadow(*m).unwrap().name())
        .collect();
    assert_eq!(names, vec!["f1", "f2", "f3"]);
}

#[test]
fn test_substitution_is_declared_by_the_concrete_control() {
    let mut matcher = BasicMatcher::new();
    for col in 0..4 {
        matcher.add_control(fader(&format!("f{}", col), col as u8, "strip", 0, col));
    }
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);
    assert_eq!(page.num_control_matches(ControlKind::Knob, false), 0);
    assert_eq!(page.num_control_matches(ControlKind::Knob, true), 0);

    let mut matcher = BasicMatcher::new();
    for col in 0..4 {
        matcher.add_control(
            fader(&format!("f{}", col), col as u8, "strip", 0, col)
                .substitutes_for([ControlKind::Knob]),
        );
    }
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);
    assert_eq!(page.num_control_matches(ControlKind::Knob, false), 0);
    assert_eq!(page.num_control_matches(ControlKind::Knob, true), 4);
}

#[test]
fn test_substitution_not_used_when_exact_suffices() {
    let matcher = BasicMatcher::new()
        .with_control(
            fader("fader", 1, "strip", 0, 0).substitutes_for([ControlKind::Knob]),
        )
        .with_control(
            ControlSurface::new("knob", ControlKind::Knob, EventPattern::control_change(2, None))
                .in_group("pots")
                .at(3, 0),
        );
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let request = MatchRequest::new(ControlKind::Knob).substitution(true).target(1);
    let matches = page.control_matches(&request).unwrap();
    assert_eq!(page.shadow(matches[0]).unwrap().name(), "knob");

    // Two knobs wanted: no group holds two, and a lone substitute is no
    // better than the lone real knob
    let request = MatchRequest::new(ControlKind::Knob)
        .substitution(true)
        .target(2)
        .exact(false);
    let matches = page.control_matches(&request).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(page.shadow(matches[0]).unwrap().name(), "knob");
}

fn knob(name: &str, cc: u8, group: &str, row: u16, col: u16) -> ControlSurface {
    ControlSurface::new(name, ControlKind::Knob, EventPattern::control_change(cc, None))
        .in_group(group)
        .at(row, col)
}

fn names(page: &DeviceShadow<Target>, mappings: &[ControlMapping]) -> Vec<String> {
    mappings
        .iter()
        .map(|m| page.shadow(*m).unwrap().name().to_string())
        .collect()
}

#[test]
fn test_equal_sized_substitute_group_does_not_displace_exact_group() {
    let mut matcher = BasicMatcher::new();
    for col in 0..3 {
        matcher.add_control(
            fader(&format!("f{}", col), col as u8, "strip", 0, col)
                .substitutes_for([ControlKind::Knob]),
        );
    }
    for col in 0..3 {
        matcher.add_control(knob(&format!("k{}", col), 20 + col as u8, "pots", 1, col));
    }
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let request = MatchRequest::new(ControlKind::Knob)
        .substitution(true)
        .target(4)
        .exact(false);
    let matches = page.control_matches(&request).unwrap();
    assert_eq!(names(&page, &matches), vec!["k0", "k1", "k2"]);
}

#[test]
fn test_larger_substitute_group_fills_shortfall() {
    let mut matcher = BasicMatcher::new();
    matcher.add_control(knob("k0", 20, "pots", 1, 0));
    for col in 0..3 {
        matcher.add_control(
            fader(&format!("f{}", col), col as u8, "strip", 0, col)
                .substitutes_for([ControlKind::Knob]),
        );
    }
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let request = MatchRequest::new(ControlKind::Knob)
        .substitution(true)
        .target(3);
    let matches = page.control_matches(&request).unwrap();
    assert_eq!(names(&page, &matches), vec!["f0", "f1", "f2"]);
}

#[test]
fn test_group_tie_follows_declaration_not_priority() {
    let matcher = BasicMatcher::new()
        .with_control(fader("zeta", 1, "zeta", 0, 0))
        .with_control(fader("alpha", 2, "alpha", 1, 0).with_priority(5));
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let matches = page
        .control_matches(&MatchRequest::new(ControlKind::Fader))
        .unwrap();
    assert_eq!(names(&page, &matches), vec!["zeta"]);

    // Shadows follow declaration order too
    let shadows: Vec<&str> = page.shadows().iter().map(|s| s.name()).collect();
    assert_eq!(shadows, vec!["zeta", "alpha"]);
}

#[test]
fn test_exactness_boundary() {
    let matcher = two_banks();
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let err = page
        .control_matches(&MatchRequest::new(ControlKind::Fader).target(5))
        .unwrap_err();
    assert_eq!(
        err,
        ShadowError::NotEnoughMatches {
            kind: ControlKind::Fader,
            wanted: 5,
            found: 4
        }
    );

    let four = page
        .control_matches(&MatchRequest::new(ControlKind::Fader).target(4))
        .unwrap();
    assert_eq!(four.len(), 4);
}

#[test]
fn test_trim_and_too_many() {
    let matcher = BasicMatcher::new()
        .with_control(fader("f0", 0, "only", 0, 0))
        .with_control(fader("f1", 1, "only", 0, 1))
        .with_control(fader("f2", 2, "only", 0, 2));
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let trimmed = page
        .control_matches(&MatchRequest::new(ControlKind::Fader).target(2))
        .unwrap();
    assert_eq!(
        coords(&page, &trimmed),
        vec![Coordinate::new(0, 0), Coordinate::new(0, 1)]
    );

    let err = page
        .control_matches(&MatchRequest::new(ControlKind::Fader).target(2).trim(false))
        .unwrap_err();
    assert!(matches!(err, ShadowError::TooManyMatches { found: 3, .. }));

    let loose = page
        .control_matches(&MatchRequest::new(ControlKind::Fader).target(5).exact(false))
        .unwrap();
    assert_eq!(loose.len(), 3);
}

#[test]
fn test_zero_matches() {
    let matcher = two_banks();
    let page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let empty = page
        .control_matches(&MatchRequest::new(ControlKind::JogWheel))
        .unwrap();
    assert!(empty.is_empty());

    let err = page
        .control_matches(&MatchRequest::new(ControlKind::JogWheel).raise_on_zero(true))
        .unwrap_err();
    assert_eq!(
        err,
        ShadowError::NoMatches {
            kind: ControlKind::JogWheel
        }
    );
}

#[test]
fn test_binding_exclusivity() {
    let matcher = two_banks();
    let mut page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);
    let a0 = page.find("a0").unwrap().mapping();
    let a1 = page.find("a1").unwrap().mapping();

    page.bind_control(a0, record, BindArgs::from(vec![json!("first")]))
        .unwrap();

    let err = page.bind_control(a0, record, BindArgs::empty()).unwrap_err();
    assert_eq!(err, ShadowError::ControlNotFree { control: a0 });

    let err = page
        .bind_controls(&[a1, a0], record, ArgsSource::None)
        .unwrap_err();
    assert_eq!(err, ShadowError::ControlNotFree { control: a0 });

    // Original binding intact, a1 untouched by the failed bulk bind
    assert_eq!(page.args(a0).unwrap().str(0), Some("first"));
    assert!(page.is_free(a1));
    assert_eq!(page.binding_count(), 1);
}

#[test]
fn test_partition_invariant() {
    let matcher = two_banks();
    let mut page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    page.bind_matches(
        MatchRequest::new(ControlKind::Fader).target(2),
        record,
        ArgsSource::ByIndex,
        true,
    )
    .unwrap();

    let free = page.free_controls();
    let bound = page.bound_controls();
    assert_eq!(free.len() + bound.len(), page.shadows().len());
    assert!(bound.iter().all(|m| !free.contains(m)));
    assert_eq!(free.len(), 4);
}

#[test]
fn test_duplicate_in_bulk_list_is_rejected() {
    let matcher = two_banks();
    let mut page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);
    let b0 = page.find("b0").unwrap().mapping();

    let err = page
        .bind_controls(&[b0, b0], record, ArgsSource::None)
        .unwrap_err();
    assert_eq!(err, ShadowError::ControlNotFree { control: b0 });
    assert!(page.is_free(b0));
}

#[test]
fn test_unknown_control() {
    let matcher = two_banks();
    let other = BasicMatcher::new().with_control(fader("x", 99, "x", 0, 0));
    let stranger = other.controls()[0].mapping();

    let mut page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);
    let err = page
        .bind_control(stranger, record, BindArgs::empty())
        .unwrap_err();
    assert_eq!(err, ShadowError::UnknownControl { control: stranger });
}

#[test]
fn test_args_sources() {
    let matcher = two_banks();
    let mut page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);
    let bank_a = page
        .control_matches(&MatchRequest::new(ControlKind::Fader).target(4))
        .unwrap();

    // Short parallel list fails and binds nothing
    let err = page
        .bind_controls(
            &bank_a,
            record,
            ArgsSource::List(vec![BindArgs::index(7), BindArgs::index(8)]),
        )
        .unwrap_err();
    assert_eq!(
        err,
        ShadowError::ArgsLengthMismatch {
            expected: 4,
            got: 2
        }
    );
    assert_eq!(page.binding_count(), 0);

    // Generator sees the resolved controls
    page.bind_controls(
        &bank_a,
        record,
        ArgsSource::generator(|shadows| {
            shadows
                .iter()
                .map(|s| BindArgs::from(vec![json!(s.name())]))
                .collect::<Vec<_>>()
                .into_iter()
        }),
    )
    .unwrap();
    assert_eq!(page.args(bank_a[2]).unwrap().str(0), Some("a2"));

    // Index args on the remaining bank
    let bank_b = page
        .control_matches(&MatchRequest::new(ControlKind::Fader))
        .unwrap();
    page.bind_controls(&bank_b, record, ArgsSource::ByIndex).unwrap();
    assert_eq!(page.args(bank_b[1]).unwrap().as_index(), Some(1));
}

#[test]
fn test_bind_match_raise_on_failure() {
    let matcher = two_banks();
    let mut page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);

    let missing = page
        .bind_match(
            MatchRequest::new(ControlKind::Pedal).raise_on_zero(true),
            record,
            BindArgs::empty(),
            false,
        )
        .unwrap();
    assert!(missing.is_none());

    let err = page
        .bind_match(
            MatchRequest::new(ControlKind::Pedal),
            record,
            BindArgs::empty(),
            true,
        )
        .unwrap_err();
    assert!(matches!(err, ShadowError::NotEnoughMatches { wanted: 1, .. }));

    let bound = page
        .bind_matches(
            MatchRequest::new(ControlKind::Fader).target(3),
            record,
            ArgsSource::None,
            true,
        )
        .unwrap();
    assert_eq!(bound.len(), 3);
    assert_eq!(page.shadow(bound[0]).unwrap().group(), "A");
}

#[test]
fn test_dispatch_hit_and_miss() {
    let mut matcher = two_banks();
    let mut page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);
    let b1 = page.find("b1").unwrap().mapping();
    page.bind_control(b1, record, BindArgs::index(1)).unwrap();

    let mut target = Target::default();

    // Unbound control: silent miss
    let mut event = matcher.match_event(&[0xB0, 0, 64]).unwrap();
    assert!(!page.process_event(&mut event, &mut target));
    assert!(!event.handled);
    assert!(target.hits.is_empty());

    let mut event = matcher.match_event(&[0xB0, 11, 127]).unwrap();
    assert!(page.process_event(&mut event, &mut target));
    assert!(event.handled);
    assert_eq!(target.hits.len(), 1);
    assert_eq!(target.hits[0].0, "b1");
    assert_eq!(target.hits[0].1, 1.0);
    assert_eq!(target.hits[0].2.as_index(), Some(1));
    assert_eq!(page.shadow(b1).unwrap().state.value, Some(1.0));
}

#[test]
fn test_callback_verdict_is_returned_verbatim() {
    let mut matcher = two_banks();
    let mut page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);
    let a0 = page.find("a0").unwrap().mapping();

    page.bind_control(
        a0,
        |event, _target: &mut Target, _args| {
            event.shadow.set_color(Color::RED);
            false
        },
        BindArgs::empty(),
    )
    .unwrap();

    let mut event = matcher.match_event(&[0xB0, 0, 1]).unwrap();
    assert!(!page.process_event(&mut event, &mut Target::default()));
    assert!(!event.handled);
    assert_eq!(page.shadow(a0).unwrap().state.color, Color::RED);
}

#[test]
fn test_independent_pages_over_one_matcher() {
    let matcher = two_banks();
    let mut first: DeviceShadow<Target> = DeviceShadow::new("first", &matcher);
    let mut second: DeviceShadow<Target> = DeviceShadow::new("second", &matcher);
    let a0 = first.find("a0").unwrap().mapping();

    first.bind_control(a0, record, BindArgs::empty()).unwrap();
    second.bind_control(a0, record, BindArgs::empty()).unwrap();

    first.shadow_mut(a0).unwrap().set_annotation("Vol");
    assert_eq!(second.shadow(a0).unwrap().state.annotation, None);
}

#[test]
fn test_apply_thorough_and_transparent() {
    let matcher = two_banks();
    let mut page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);
    page.bind_matches(
        MatchRequest::new(ControlKind::Fader),
        record,
        ArgsSource::None,
        true,
    )
    .unwrap();
    page.bind_matches(
        MatchRequest::new(ControlKind::Fader),
        record,
        ArgsSource::None,
        true,
    )
    .unwrap();
    assert!(page.free_controls().is_empty());

    let mut sink = RecordingSink::new();
    page.apply(true, &mut sink);
    assert_eq!(sink.writes.len(), 6);
    for shadow in page.shadows() {
        assert_eq!(sink.write_count(shadow.mapping().control()), 1);
    }

    let mut overlay: DeviceShadow<Target> = DeviceShadow::new("overlay", &matcher).transparent(true);
    let b0 = overlay.find("b0").unwrap().mapping();
    overlay.bind_control(b0, record, BindArgs::empty()).unwrap();

    let mut sink = RecordingSink::new();
    overlay.apply(true, &mut sink);
    assert_eq!(sink.writes, vec![b0.control()]);

    let mut sink = RecordingSink::new();
    page.unbind(page.find("a3").unwrap().mapping());
    page.apply(false, &mut sink);
    assert_eq!(sink.writes.len(), 5);
}

#[test]
fn test_unbind_returns_control_to_free_set() {
    let matcher = two_banks();
    let mut page: DeviceShadow<Target> = DeviceShadow::new("page", &matcher);
    let b0 = page.find("b0").unwrap().mapping();

    page.bind_control(b0, record, BindArgs::empty()).unwrap();
    page.shadow_mut(b0).unwrap().set_color(Color::GREEN);

    assert!(page.unbind(b0));
    assert!(!page.unbind(b0));
    assert!(page.is_free(b0));
    assert!(page.shadow(b0).unwrap().state.color.is_off());
    page.bind_control(b0, record, BindArgs::empty()).unwrap();

    page.unbind_all();
    assert_eq!(page.free_controls().len(), 6);
}

#[test]
fn test_tick_hooks() {
    let matcher = two_banks();
    let mut page: DeviceShadow<u32> = DeviceShadow::new("page", &matcher);
    let mut ticks = 0;
    assert!(!page.tick(&mut ticks));

    page.on_tick(|shadows, ticks: &mut u32| {
        *ticks += 1;
        shadows[0].set_annotation(format!("t{}", ticks));
    });

    assert!(page.tick(&mut ticks));
    assert!(page.tick(&mut ticks));

    assert_eq!(ticks, 2);
    assert_eq!(page.shadows()[0].state.annotation.as_deref(), Some("t2"));
}
