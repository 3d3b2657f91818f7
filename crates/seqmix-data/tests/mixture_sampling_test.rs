//! Mixture construction and sampling through a `Catalog`.

mod common;

use common::*;
use seqmix_data::{DataError, Example, MixtureEntry, Rate, TaskBuilder, VocabularySource, EOS_ID};

fn byte_task(name: &str, dataset: &str) -> TaskBuilder {
    TaskBuilder::new(name, format!("{dataset}:1.0.0"), VocabularySource::Byte)
}

/// First target token of each example.
fn target_heads(examples: &[Example]) -> Vec<i64> {
    examples.iter().map(|ex| ex["targets"].as_ints().unwrap()[0]).collect()
}

#[test]
fn test_fixed_rates_converge_to_ratio() {
    let fixture = Fixture::new();
    write_text_dataset(&fixture.data_dir(), "alpha", &[("train", vec![text_pair("x", "a"), text_pair("y", "a")])]);
    write_text_dataset(&fixture.data_dir(), "beta", &[("train", vec![text_pair("z", "b")])]);
    let catalog = fixture.catalog();
    catalog.add_task(byte_task("alpha", "alpha")).unwrap();
    catalog.add_task(byte_task("beta", "beta")).unwrap();
    catalog.add_mixture("alpha_beta", [("alpha", 3.0), ("beta", 1.0)], None).unwrap();

    let dataset = catalog.get_dataset("alpha_beta", &lengths(4, 4), "train", false, false).unwrap();
    let examples = collect(&dataset.take(4000));
    assert_eq!(examples.len(), 4000);

    // Byte ids: 'a' -> 100, 'b' -> 101.
    let heads = target_heads(&examples);
    let from_alpha = heads.iter().filter(|&&t| t == 100).count();
    let from_beta = heads.iter().filter(|&&t| t == 101).count();
    assert_eq!(from_alpha + from_beta, 4000);
    let fraction = from_alpha as f64 / 4000.0;
    assert!((0.72..0.78).contains(&fraction), "alpha fraction {fraction}");
}

#[test]
fn test_mixed_examples_keep_only_output_features() {
    let fixture = Fixture::new();
    write_text_dataset(&fixture.data_dir(), "alpha", &[("train", vec![text_pair("x", "a")])]);
    let catalog = fixture.catalog();
    catalog.add_task(byte_task("alpha", "alpha")).unwrap();
    let mixture = catalog.add_mixture("solo", ["alpha"], Some(Rate::from(1.0))).unwrap();

    let examples = collect(&mixture.get_dataset(&lengths(4, 4), "train", false, false).unwrap().take(3));
    for ex in &examples {
        assert_eq!(ex.keys().collect::<Vec<_>>(), vec!["inputs", "targets"]);
        assert_eq!(ex["targets"].as_ints().unwrap(), [100, EOS_ID]);
    }
}

#[test]
fn test_tasks_without_split_are_skipped() {
    let fixture = Fixture::new();
    write_text_dataset(
        &fixture.data_dir(),
        "alpha",
        &[("train", vec![text_pair("x", "a")]), ("validation", vec![text_pair("v", "a")])],
    );
    write_text_dataset(&fixture.data_dir(), "beta", &[("train", vec![text_pair("z", "b")])]);
    let catalog = fixture.catalog();
    catalog.add_task(byte_task("alpha", "alpha")).unwrap();
    catalog.add_task(byte_task("beta", "beta")).unwrap();
    let mixture = catalog.add_mixture("alpha_beta", [("alpha", 1.0), ("beta", 1.0)], None).unwrap();

    let examples = collect(&mixture.get_dataset(&lengths(4, 4), "validation", false, false).unwrap().take(20));
    assert!(target_heads(&examples).iter().all(|&t| t == 100));

    assert!(matches!(
        mixture.get_dataset(&lengths(4, 4), "test", false, false),
        Err(DataError::NoAvailableTasks(split)) if split == "test"
    ));
}

#[test]
fn test_num_examples_rate_over_cached_tasks() {
    let fixture = Fixture::new();
    let big: Vec<_> = (0..30).map(|_| token_pair(vec![5, 6], vec![100])).collect();
    let small: Vec<_> = (0..10).map(|_| token_pair(vec![7], vec![101])).collect();
    write_task_cache(&fixture.cache_dir(), "big", "train", &big, 3);
    write_task_cache(&fixture.cache_dir(), "small", "train", &small, 1);

    let catalog = fixture.catalog();
    // Cache-only tasks have no raw dataset to report splits, so name them.
    catalog.add_task(byte_task("big", "big").splits(["train"])).unwrap();
    catalog.add_task(byte_task("small", "small").splits(["train"])).unwrap();
    let mixture = catalog.add_mixture("sized", ["big", "small"], Some(Rate::num_examples())).unwrap();
    assert_eq!(mixture.get_rate(&catalog.get_task("big").unwrap()).unwrap(), 30.0);

    // The cached training split also goes through the mixing diagnostics.
    let dataset = mixture.get_dataset_with_stats(&lengths(4, 4), "train", true, true, true).unwrap();
    let heads = target_heads(&collect(&dataset.take(4000)));
    let fraction = heads.iter().filter(|&&t| t == 100).count() as f64 / 4000.0;
    assert!((0.72..0.78).contains(&fraction), "big fraction {fraction}");
}

#[test]
fn test_failing_diagnostics_do_not_break_mixing() {
    let fixture = Fixture::new();
    write_task_cache(&fixture.cache_dir(), "plain", "train", &[token_pair(vec![5], vec![100])], 1);
    // Without token counts the analytic mixing table cannot be built.
    std::fs::write(fixture.cache_dir().join("plain").join("stats.train.json"), r#"{"examples": 1}"#).unwrap();
    let catalog = fixture.catalog();
    catalog.add_task(byte_task("plain", "plain").splits(["train"])).unwrap();
    let mixture = catalog.add_mixture("plain_mix", [("plain", 1.0)], None).unwrap();

    let dataset = mixture.get_dataset(&lengths(4, 4), "train", true, false).unwrap();
    assert_eq!(collect(&dataset.take(5)).len(), 5);
}

#[test]
fn test_incompatible_tasks_are_not_registered() {
    let fixture = Fixture::new();
    let catalog = fixture.catalog();
    catalog.add_task(byte_task("pairs", "alpha")).unwrap();
    catalog.add_task(byte_task("targets_only", "alpha").output_features(["targets"])).unwrap();

    let result = catalog.add_mixture("bad", ["pairs", "targets_only"], Some(Rate::from(1.0)));
    assert!(matches!(result, Err(DataError::IncompatibleMixture(_))));
    assert!(catalog.mixtures().is_empty());

    let entries = vec![MixtureEntry::from(("pairs", 2.0)), MixtureEntry::from("targets_only")];
    assert!(matches!(catalog.add_mixture("unrated", entries, None), Err(DataError::MissingRate(_))));
}

#[test]
fn test_duplicate_mixture_name_is_rejected() {
    let fixture = Fixture::new();
    let catalog = fixture.catalog();
    catalog.add_task(byte_task("pairs", "alpha")).unwrap();
    catalog.add_mixture("mix", ["pairs"], Some(Rate::from(1.0))).unwrap();
    assert!(matches!(
        catalog.add_mixture("mix", ["pairs"], Some(Rate::from(1.0))),
        Err(DataError::DuplicateRegistration(_))
    ));
}
