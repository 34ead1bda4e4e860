use crashguard::{CrashGuard, GuardConfig, GuardResult};

use super::print_dump;

pub fn run(guard: &CrashGuard, label: Option<&str>) -> GuardResult {
    let mut config = GuardConfig::new().with_shared_callback(print_dump());
    if let Some(label) = label {
        config = config.with_label(label);
    }
    guard.run_with(config, || {
        let answer: i32 = (1..=6).product::<i32>() / 20 + 6;
        println!("protected function returning {answer}");
        answer
    })
}
