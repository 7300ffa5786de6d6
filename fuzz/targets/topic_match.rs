#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use shortbus::{TopicPattern, TOPIC_DELIMITER};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    patterns: Vec<String>,
    topic: String,
}

fuzz_target!(|input: FuzzInput| {
    // Сопоставление не должно паниковать ни на каком входе.
    let pattern = TopicPattern::compile(input.patterns.clone());
    let any = pattern.matches(&input.topic);

    // ИЛИ по набору совпадает с ИЛИ по отдельным шаблонам.
    let single = input
        .patterns
        .iter()
        .any(|p| TopicPattern::compile(p.as_str()).matches(&input.topic));
    assert_eq!(any, single);

    // Шаблон без `*` и `**` — литерал.
    for p in &input.patterns {
        let literal = !p
            .split(TOPIC_DELIMITER)
            .any(|s| s == "*" || s == "**");
        if literal {
            assert_eq!(
                TopicPattern::compile(p.as_str()).matches(&input.topic),
                *p == input.topic
            );
        }
    }
});
