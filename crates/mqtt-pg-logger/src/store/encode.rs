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

// src/store/encode.rs
// COPY text-format encoding for journal rows. Postgres expects one
// line per row, tab-separated columns, with backslash escapes for the
// characters that would otherwise act as delimiters.

use crate::message::Message;

// copy_rows renders a batch in the column order of the COPY statement:
// (message_id, topic, text, qos, retain, time).
pub fn copy_rows(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        push_row(&mut out, message);
    }
    out
}

fn push_row(out: &mut String, message: &Message) {
    out.push_str(&message.message_id.to_string());
    out.push('\t');
    push_escaped(out, &message.topic);
    out.push('\t');
    push_escaped(out, &message.text);
    out.push('\t');
    out.push_str(&message.qos.to_string());
    out.push('\t');
    out.push(if message.retain { 't' } else { 'f' });
    out.push('\t');
    out.push_str(&message.time.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string());
    out.push('\n');
}

// Tab, newline, carriage return and backslash are structural in the
// text format; everything else passes through verbatim.
fn push_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    use super::*;

    fn message(text: &str) -> Message {
        Message {
            message_id: 7,
            topic: "base/in/a".to_string(),
            text: text.to_string(),
            qos: 1,
            retain: false,
            time: Local.with_ymd_and_hms(2020, 2, 2, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn renders_one_line_per_row() {
        let rows = copy_rows(&[message("text-1"), message("text-2")]);
        assert_eq!(rows.lines().count(), 2);
        assert!(rows.ends_with('\n'));
    }

    #[test]
    fn renders_columns_in_copy_order() {
        let rows = copy_rows(&[message("payload")]);
        let fields: Vec<&str> = rows.trim_end().split('\t').collect();

        assert_eq!(fields[0], "7");
        assert_eq!(fields[1], "base/in/a");
        assert_eq!(fields[2], "payload");
        assert_eq!(fields[3], "1");
        assert_eq!(fields[4], "f");
        assert!(fields[5].starts_with("2020-02-02 09:00:00.000000"));
        assert_eq!(fields.len(), 6);
    }

    #[test]
    fn escapes_structural_characters() {
        let rows = copy_rows(&[message("a\tb\nc\rd\\e")]);
        let fields: Vec<&str> = rows.trim_end().split('\t').collect();

        // The payload column must stay a single field.
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[2], "a\\tb\\nc\\rd\\\\e");
    }

    #[test]
    fn retain_renders_as_boolean_literal() {
        let mut with_retain = message("x");
        with_retain.retain = true;
        let rows = copy_rows(&[with_retain]);
        assert!(rows.contains("\tt\t"));
    }

    #[test]
    fn timestamp_carries_utc_offset() {
        let rows = copy_rows(&[message("x")]);
        let time_field = rows.trim_end().rsplit('\t').next().unwrap();
        // Offsets look like +02:00 / -07:00 / +00:00.
        assert!(time_field.len() > 6);
        let offset = &time_field[time_field.len() - 6..];
        assert!(offset.starts_with('+') || offset.starts_with('-'));
        assert_eq!(&offset[3..4], ":");
    }

    #[test]
    fn empty_batch_renders_nothing() {
        assert!(copy_rows(&[]).is_empty());
    }
}
