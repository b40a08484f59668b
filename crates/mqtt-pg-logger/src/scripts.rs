/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

// src/scripts.rs
// Splitting of SQL script text into single executable statements, used
// by the one-shot schema bootstrap. Scripts whose statements contain
// inner semicolons (function bodies) must be executed whole instead.

// split_statements parses line-oriented SQL: blank lines are dropped,
// `--` comment lines are dropped, remaining lines accumulate into a
// statement that ends with the first line ending in `;`.
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current: Option<String> = None;

    for line in text.replace('\r', "\n").split('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        let line = line.trim_end();
        match current.as_mut() {
            Some(statement) => {
                statement.push('\n');
                statement.push_str(line);
            }
            None => current = Some(line.to_string()),
        }

        if line.ends_with(';') {
            if let Some(statement) = current.take() {
                statements.push(statement);
            }
        }
    }

    // A trailing statement without `;` still counts.
    if let Some(statement) = current.take() {
        statements.push(statement);
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_statements_and_strips_noise() {
        let lines = [
            " ",
            " -- comment filtered out",
            "1 ",
            " 2 ",
            "3; ",
            "",
            "4;",
            "5; ",
            "",
            "6; ",
        ];
        let statements = split_statements(&lines.join("\n"));

        assert_eq!(statements.len(), 4);
        assert_eq!(statements[0], "1\n 2\n3;");
        assert_eq!(statements[1], "4;");
        assert_eq!(statements[2], "5;");
        assert_eq!(statements[3], "6;");
    }

    #[test]
    fn strips_comment_lines_inside_statements() {
        let text = "CREATE TABLE t (\n-- the key\n    id INTEGER\n);";
        let statements = split_statements(text);

        assert_eq!(statements, vec!["CREATE TABLE t (\n    id INTEGER\n);"]);
    }

    #[test]
    fn keeps_statement_without_terminator() {
        let statements = split_statements("SELECT 1");
        assert_eq!(statements, vec!["SELECT 1"]);
    }

    #[test]
    fn handles_carriage_returns() {
        let statements = split_statements("SELECT 1;\r\nSELECT 2;\r\n");
        assert_eq!(statements, vec!["SELECT 1;", "SELECT 2;"]);
    }

    #[test]
    fn empty_input_yields_no_statements() {
        assert!(split_statements("").is_empty());
        assert!(split_statements("-- only a comment\n\n").is_empty());
    }

    // Re-splitting the joined output must reproduce the statement list;
    // comments and blank lines are gone after the first pass.
    #[test]
    fn splitting_is_stable_after_join() {
        let text = "-- header\nCREATE TABLE a (\n  x INTEGER\n);\n\nCREATE INDEX a_x ON a (x);\n";
        let first = split_statements(text);
        let second = split_statements(&first.join("\n"));

        assert_eq!(first, second);
    }
}
