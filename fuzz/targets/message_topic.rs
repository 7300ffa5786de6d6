#![no_main]

use libfuzzer_sys::fuzz_target;

use shortbus::{Message, TopicPattern};

fuzz_target!(|topic: String| {
    // Допустимый топик всегда совпадает с самим собой как с шаблоном
    // и с `**`.
    if let Ok(message) = Message::new(topic.as_str()) {
        assert_eq!(message.topic(), topic);
        assert!(TopicPattern::compile(topic.as_str()).matches(message.topic()));
        assert!(TopicPattern::any().matches(message.topic()));
        assert!(TopicPattern::compile("**").matches(message.topic()));
    }
});
