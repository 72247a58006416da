//! Logging configuration.
/*
 * Copyright 2022-2025 Crown Copyright
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
use chrono::Local;
use env_logger::Env;
use std::{io::Write, sync::Once};

static LOG_CFG: Once = Once::new();

/// Install an `env_logger` for drivers that host the aggregation engine and have not
/// configured logging themselves. Only the first call has any effect, from any thread.
///
/// The filter defaults to `info` and can be overridden with `RUST_LOG`. If another
/// logger is already installed this leaves it in place.
pub fn maybe_cfg_log() {
    LOG_CFG.call_once(|| {
        let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] {}:{} - {}",
                    Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                    record.level(),
                    record.file().unwrap_or("??"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .try_init();
    });
}
