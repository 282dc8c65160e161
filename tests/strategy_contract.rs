use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use tokenbench::bench::{BenchmarkRunner, RunPlan};
use tokenbench::config::{CorpusConfig, HarnessConfig};
use tokenbench::corpus::{Corpus, Tokenizer};
use tokenbench::models::{Answer, Operation, SizeReport};
use tokenbench::store::Backends;
use tokenbench::strategy::{build_strategies, Strategy, StrategyKind};

fn scenario() -> Corpus {
    Corpus::from_tokens(["the", "whale", "the", "sea", "the"])
}

/// Skewed corpus: word `wN` appears roughly in proportion to 1/(N+1)
fn generated_corpus(seed: u64, len: usize, vocabulary: usize) -> Corpus {
    let mut rng = SmallRng::seed_from_u64(seed);
    let tokens: Vec<String> = (0..len)
        .map(|_| {
            let a = rng.gen_range(0..vocabulary);
            let b = rng.gen_range(0..vocabulary);
            format!("w{}", a.min(b))
        })
        .collect();
    Corpus::from_tokens(tokens)
}

async fn initialized(corpus: &Corpus) -> Vec<(StrategyKind, Box<dyn Strategy>)> {
    let backends = Backends::in_memory();
    let config = HarnessConfig::default();

    let mut built = Vec::new();
    for kind in StrategyKind::ALL {
        let mut strategy = kind.build(&backends, &config, corpus).await.expect("build");
        strategy.initialize(corpus).await.expect("initialize");
        built.push((kind, strategy));
    }
    built
}

#[tokio::test]
async fn test_concrete_scenario_on_every_strategy() {
    let corpus = scenario();
    for (kind, strategy) in initialized(&corpus).await {
        assert!(strategy.presence_check("the").await.unwrap(), "{}", kind);

        let count = strategy.item_count("the").await.unwrap();
        if kind.is_exact() {
            assert_eq!(count, 3, "{}", kind);
        } else {
            assert!(count >= 3, "{}", kind);
        }

        assert_eq!(strategy.cardinality_check().await.unwrap(), 3, "{}", kind);
        assert_eq!(strategy.top_k(1).await.unwrap(), vec!["the"], "{}", kind);
    }
}

#[tokio::test]
async fn test_no_false_negatives_and_no_undercounts() {
    let corpus = generated_corpus(11, 2_000, 150);
    let truth = corpus.frequencies();

    for (kind, strategy) in initialized(&corpus).await {
        for (token, &count) in &truth {
            assert!(strategy.presence_check(token).await.unwrap(), "{} lost {}", kind, token);

            let reported = strategy.item_count(token).await.unwrap();
            if kind.is_exact() {
                assert_eq!(reported, count, "{} miscounted {}", kind, token);
            } else {
                assert!(reported >= count, "{} under-counted {}", kind, token);
            }
        }

        let cardinality = strategy.cardinality_check().await.unwrap();
        if kind.is_exact() {
            assert_eq!(cardinality, truth.len() as u64, "{}", kind);
        }
    }
}

#[tokio::test]
async fn test_absent_tokens_are_mostly_reported_absent() {
    let corpus = generated_corpus(3, 1_000, 80);
    let present: HashSet<&str> = corpus.iter().map(String::as_str).collect();

    let mut rng = SmallRng::seed_from_u64(99);
    let absent: Vec<String> = (0..500)
        .map(|_| (0..10).map(|_| rng.gen_range(b'a'..=b'z') as char).collect::<String>())
        .filter(|token| !present.contains(token.as_str()))
        .collect();

    let error_rate = HarnessConfig::default().sketch.bloom_error_rate;
    for (kind, strategy) in initialized(&corpus).await {
        let mut false_positives = 0usize;
        for token in &absent {
            if strategy.presence_check(token).await.unwrap() {
                false_positives += 1;
            }
        }

        if kind.is_exact() {
            assert_eq!(false_positives, 0, "{}", kind);
        } else {
            let allowed = (error_rate * absent.len() as f64 * 3.0).ceil() as usize + 1;
            assert!(false_positives <= allowed, "{}: {} false positives", kind, false_positives);
        }
    }
}

#[tokio::test]
async fn test_top_k_is_deterministic_and_bounded() {
    let corpus = generated_corpus(5, 1_500, 60);
    let distinct = corpus.distinct_count();
    let truth = corpus.frequencies();

    for (kind, strategy) in initialized(&corpus).await {
        let first = strategy.top_k(5).await.unwrap();
        let second = strategy.top_k(5).await.unwrap();
        assert_eq!(first, second, "{}", kind);
        assert_eq!(first.len(), 5.min(distinct), "{}", kind);

        // Highest frequency first.
        let counts: Vec<u64> = first.iter().map(|t| truth[t.as_str()]).collect();
        assert!(counts.windows(2).all(|w| w[0] >= w[1]), "{}: {:?}", kind, counts);

        assert!(strategy.top_k(0).await.unwrap().is_empty(), "{}", kind);
    }
}

#[tokio::test]
async fn test_exact_strategies_break_ties_by_token() {
    let corpus = Corpus::from_tokens(["pequod", "ahab", "ishmael", "ahab", "pequod", "queequeg"]);
    for (kind, strategy) in initialized(&corpus).await {
        if kind == StrategyKind::ExactUnindexed || kind == StrategyKind::ExactIndexed {
            assert_eq!(strategy.top_k(3).await.unwrap(), vec!["ahab", "pequod", "ishmael"]);
        }
    }
}

#[tokio::test]
async fn test_report_size_does_not_alter_answers() {
    let corpus = scenario();
    for (kind, strategy) in initialized(&corpus).await {
        let before = (
            strategy.presence_check("whale").await.unwrap(),
            strategy.item_count("the").await.unwrap(),
            strategy.cardinality_check().await.unwrap(),
            strategy.top_k(3).await.unwrap(),
        );

        let mut sizes = SizeReport::new();
        strategy.report_size(&mut sizes).await.unwrap();
        assert!(!sizes.is_empty(), "{}", kind);
        assert!(sizes.iter().all(|(label, _)| label.starts_with(kind.key())));

        let after = (
            strategy.presence_check("whale").await.unwrap(),
            strategy.item_count("the").await.unwrap(),
            strategy.cardinality_check().await.unwrap(),
            strategy.top_k(3).await.unwrap(),
        );
        assert_eq!(before, after, "{}", kind);
    }
}

#[tokio::test]
async fn test_full_run_against_memory_backends() {
    let tokenizer = Tokenizer::new(&CorpusConfig::default());
    let corpus = Corpus::from_text(
        "Call me Ishmael. The whale, the sea; the ship\u{2014}and THE whale!",
        &tokenizer,
    );

    let config = HarnessConfig::default().with_top_k(2);
    let backends = Backends::in_memory();
    backends.reset().await.unwrap();
    let mut strategies = build_strategies(&StrategyKind::ALL, &backends, &config, &corpus)
        .await
        .unwrap();

    let runner = BenchmarkRunner::new(RunPlan::from_config(&config));
    let report = runner.run(&mut strategies, &corpus).await.unwrap();
    backends.close().await;

    assert_eq!(report.strategies.len(), 4);
    assert_eq!(report.measurements.len(), 4 * Operation::ALL.len());
    assert_eq!(report.failure_count(), 0);
    assert!(report.measurements.iter().all(|m| m.outcome.is_completed()));

    for name in ["exact unindexed", "exact indexed", "sorted set"] {
        let count = report.measurement(name, Operation::ItemCount).unwrap();
        assert_eq!(count.outcome.answer(), Some(&Answer::Count(4)));
        let top = report.measurement(name, Operation::TopK).unwrap();
        assert_eq!(
            top.outcome.answer(),
            Some(&Answer::Tokens(vec!["the".to_string(), "whale".to_string()]))
        );
    }

    let labels: HashMap<&str, u64> = report.sizes.iter().collect();
    for label in [
        "exact_unindexed.table",
        "exact_indexed.table",
        "sorted_set.zset",
        "sketch.bloom",
        "sketch.cms",
        "sketch.hll",
        "sketch.topk",
    ] {
        assert!(labels.contains_key(label), "missing {}", label);
    }
    assert_eq!(labels.len(), 7);
}
