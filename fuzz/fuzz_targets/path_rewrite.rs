#![no_main]

use libfuzzer_sys::fuzz_target;

use onion_proxy::fuzzing::{rewrite_location, rewrite_onion_paths};

const HOST: &str = "exampleabcdefghij1234.onion";

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let once = rewrite_onion_paths(text.as_bytes(), HOST);
    let twice = rewrite_onion_paths(&once, HOST);
    assert_eq!(once, twice, "path rewrite must be idempotent");

    let location = rewrite_location(text, HOST, true);
    assert_eq!(location, rewrite_location(&location, HOST, true));
});
