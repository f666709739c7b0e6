// SPDX-License-Identifier: Apache-2.0
//
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

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line interface for picklebrine.
///
/// Supports two subcommands: `critique` (diagnose structural issues,
/// optionally against a reference brine) and `sample` (recover and print
/// the brine of a pickle).
#[derive(Parser, Debug)]
#[command(name = "picklebrine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk a pickle and report any structural issues found.
    Critique {
        /// path to a single pickle file
        #[arg(value_name = "FILE", conflicts_with = "dir", required_unless_present = "dir")]
        file: Option<PathBuf>,

        /// directory of pickle files to critique in parallel.
        /// conflicts with FILE argument
        #[arg(long = "dir", short = 'd', value_name = "DIR", conflicts_with = "file", required_unless_present = "file")]
        dir: Option<PathBuf>,

        /// path to a reference brine (JSON) the pickle's own brine must match
        #[arg(long, value_name = "BRINE_JSON")]
        reference: Option<PathBuf>,

        /// stop at the first issue instead of collecting every one found
        #[arg(long)]
        no_fail_fast: bool,
    },
    /// Recover and print a pickle's brine as JSON.
    Sample {
        /// path to a single pickle file
        file: PathBuf,

        /// write the brine JSON here instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

impl Cli {
    /// Check if the invocation targets a directory of files rather than one
    /// file.
    pub fn is_batch_mode(&self) -> bool {
        matches!(&self.command, Command::Critique { dir: Some(_), .. })
    }
}
