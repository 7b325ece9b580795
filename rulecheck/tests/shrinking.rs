use rulecheck::{
    ChoiceStream, DEFAULT_MAX_CHOICES, DatabaseKey, DirectoryDatabase, ExampleDatabase, RunSeed,
    ShrinkConfig, Shrinker, Status, Strategy, TestCase, decode_choices, encode_choices, text,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn long_names(choices: &[u64]) -> TestCase<&'static str> {
    classify(ChoiceStream::replay(choices))
}

fn classify(mut stream: ChoiceStream) -> TestCase<&'static str> {
    let status = match stream.draw(&text(0, 10)) {
        Ok(name) if name.chars().count() >= 3 => Status::Interesting("long"),
        Ok(_) => Status::Valid,
        Err(e) if e.is_overrun() => Status::Overrun,
        Err(_) => Status::Invalid,
    };
    let (choices, spans) = stream.finish();
    TestCase::new(choices, spans, status, 0)
}

fn first_failure(seed: u64) -> TestCase<&'static str> {
    let seed = RunSeed::new(seed);
    (0..1000)
        .map(|example| classify(ChoiceStream::live(seed.example_rng(example), DEFAULT_MAX_CHOICES)))
        .find(|case| case.status.is_interesting())
        .expect("a long name within 1000 examples")
}

#[test]
fn test_text_shrinks_to_shortest_failing_string() {
    init_tracing();
    let initial = first_failure(17);
    let result = Shrinker::new(initial, long_names, ShrinkConfig::default())
        .unwrap()
        .shrink();

    assert!(result.completed);
    let mut stream = ChoiceStream::replay(&result.minimal.choices);
    assert_eq!(text(0, 10).draw(&mut stream).unwrap(), "000");
}

#[test]
fn test_same_seed_same_failure() {
    init_tracing();
    assert_eq!(first_failure(5).choices, first_failure(5).choices);
}

#[test]
fn test_saved_choices_survive_a_directory_database() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let database = DirectoryDatabase::open(dir.path()).unwrap();
    let key = DatabaseKey::new("long_names", b"text(0, 10)");
    let choices = first_failure(3).choices;

    database.save(&key, &encode_choices(&choices)).unwrap();
    database.save(&key, &encode_choices(&choices)).unwrap();

    let saved = database.fetch(&key).unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(decode_choices(&saved[0]).unwrap(), choices);
    assert!(long_names(&choices).status.is_interesting());

    database.delete(&key, &saved[0]).unwrap();
    assert!(database.fetch(&key).unwrap().is_empty());
}
