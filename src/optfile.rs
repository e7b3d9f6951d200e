// Options file tokenizer
//
//  Copyright (C) 2014-2022 Ryan Specialty Group, LLC.
//
//  This file is part of t3make.
//
//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.
//
//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.
//
//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Options file tokenizer.
//!
//! An options file holds command-line arguments so that a project can be
//!   built by naming only the file (`-f makefile.t3m`).
//! Tokens are separated by whitespace,
//!   including newlines.
//! A double quote begins a token that extends to the next unpaired double
//!   quote,
//!     with `""` inside a quoted token standing for a literal quote;
//!   this allows filenames containing spaces.
//! A line whose first non-blank character is `#` is a comment.

/// Split the text of an options file into arguments.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut args = Vec::new();

    for line in text.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }

        tokenize_line(line, &mut args);
    }

    args
}

fn tokenize_line(line: &str, args: &mut Vec<String>) {
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let Some(&first) = chars.peek() else {
            return;
        };

        let mut tok = String::new();

        if first == '"' {
            chars.next();

            while let Some(c) = chars.next() {
                match c {
                    '"' if chars.next_if_eq(&'"').is_some() => tok.push('"'),
                    '"' => break,
                    _ => tok.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                tok.push(c);
            }
        }

        args.push(tok);
    }
}
