// Copyright 2025 Cisco Systems, Inc. and its affiliates
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::Result;
use picklebrine::{critique, sample, Brine, Cli};
use rayon::prelude::*;
use tracing_subscriber::EnvFilter;

fn load_reference(path: &Path) -> Result<Brine> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn critique_one(bytes: &[u8], reference: Option<&Brine>, fail_fast: bool) -> Result<bool> {
    let report = critique(bytes, reference, fail_fast)?;
    if report.is_clean() {
        println!("clean");
    } else {
        for issue in &report.issues {
            println!("issue: {issue}");
        }
    }
    Ok(report.is_clean())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Cli::parse();

    match args.command {
        picklebrine::Command::Critique {
            file: Some(file),
            dir: None,
            reference,
            no_fail_fast,
        } => {
            let bytes = std::fs::read(&file)?;
            let reference = reference.as_deref().map(load_reference).transpose()?;
            let fail_fast = !no_fail_fast;
            let clean = critique_one(&bytes, reference.as_ref(), fail_fast)?;
            if !clean {
                return Err(color_eyre::eyre::eyre!("{:?} has issues", file));
            }
        }
        picklebrine::Command::Critique {
            file: None,
            dir: Some(dir),
            reference,
            no_fail_fast,
        } => {
            let reference = reference.as_deref().map(load_reference).transpose()?;
            let fail_fast = !no_fail_fast;

            let entries: Vec<PathBuf> = std::fs::read_dir(&dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();

            let results: Vec<(PathBuf, Result<bool, String>)> = entries
                .into_par_iter()
                .map(|path| {
                    let outcome = std::fs::read(&path)
                        .map_err(|e| e.to_string())
                        .and_then(|bytes| {
                            critique(bytes.as_slice(), reference.as_ref(), fail_fast)
                                .map(|r| r.is_clean())
                                .map_err(|e| e.to_string())
                        });
                    (path, outcome)
                })
                .collect();

            let mut dirty: Vec<(&PathBuf, &str)> = Vec::new();
            for (path, outcome) in &results {
                match outcome {
                    Ok(true) => println!("{:?}: clean", path),
                    Ok(false) => {
                        dirty.push((path, "issues found"));
                        println!("{:?}: issues found", path);
                    }
                    Err(e) => {
                        dirty.push((path, e.as_str()));
                        println!("{:?}: error: {e}", path);
                    }
                }
            }
            if !dirty.is_empty() {
                eprintln!("{} of {} file(s) had issues:", dirty.len(), results.len());
                for (path, reason) in dirty.iter().take(10) {
                    eprintln!("  {:?}: {reason}", path);
                }
                if dirty.len() > 10 {
                    eprintln!("  ... and {} more", dirty.len() - 10);
                }
                return Err(color_eyre::eyre::eyre!(
                    "{} of {} file(s) had issues",
                    dirty.len(),
                    results.len()
                ));
            }
        }
        picklebrine::Command::Sample { file, out } => {
            let bytes = std::fs::read(&file)?;
            let brine = sample(&bytes)?;
            let json = serde_json::to_string_pretty(&brine)?;
            match out {
                Some(out) => std::fs::write(&out, json)?,
                std::option::Option::None => println!("{json}"),
            }
        }
        _ => unreachable!("clap's conflicts_with/required_unless_present rule this out"),
    }

    Ok(())
}
