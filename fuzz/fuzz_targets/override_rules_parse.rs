#![no_main]
use libfuzzer_sys::fuzz_target;

use resolver_core::overrides::parse_rules;

// parse_rules must never panic on arbitrary input, and a line that
// parses successfully must round-trip through the matcher without
// panicking either.
fuzz_target!(|data: &str| {
    let (rules, _errors) = parse_rules(data);
    for rule in rules {
        let _ = format!("{rule:?}");
    }
});
