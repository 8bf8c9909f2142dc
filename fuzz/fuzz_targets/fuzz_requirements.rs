#![no_main]

use analytics_lsp::collectors::{Collector, LineListCollector};
use libfuzzer_sys::fuzz_target;
use std::panic::AssertUnwindSafe;

fuzz_target!(|data: &[u8]| {
    let collector = LineListCollector::default();

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        collector.collect_from_reader(&mut &data[..])
    }));

    let deps = match result {
        Ok(Ok(deps)) => deps,
        Ok(Err(_)) => return,
        Err(_) => panic!("collector panicked"),
    };

    let line_count = data.iter().filter(|&&b| b == b'\n').count() as u32 + 1;
    for dep in &deps {
        for value in [&dep.name, &dep.version] {
            let position = value.position;
            if position.is_placeholder() {
                continue;
            }
            assert!(position.line >= 1, "line must be 1-based");
            assert!(position.line <= line_count, "line must be within the input");
            assert!(position.column >= 1, "column must be 1-based");
        }
    }
});
