// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pretty printers for reporting information as a tree of log lines.

use std::{borrow::Cow, sync::Mutex};

use log::Level;

const VERTICAL: char = '│';
const UP_AND_RIGHT: char = '└';
const VERTICAL_AND_RIGHT: char = '├';

lazy_static::lazy_static! {
    static ref WARNINGS: Mutex<Tree> = Mutex::new(Tree::default());
}

/// Blocks of lines; the first line of each block gets a branch symbol.
#[derive(Debug, Default)]
struct Tree {
    blocks: Vec<Vec<Cow<'static, str>>>,
}

impl Tree {
    fn lines(&self) -> Vec<String> {
        let num_blocks = self.blocks.len();
        let mut out = vec![];
        for (i_block, block) in self.blocks.iter().enumerate() {
            let num_lines = block.len();
            for (i_line, line) in block.iter().enumerate() {
                let symbol = match (i_line, i_line + 1 == num_lines, i_block + 1 == num_blocks) {
                    (0, true, true) => UP_AND_RIGHT,
                    (0, _, _) => VERTICAL_AND_RIGHT,
                    _ => VERTICAL,
                };
                out.push(format!("{symbol} {line}"));
            }
        }
        out
    }

    fn log(&self, level: Level, title: &str) {
        log::log!(level, "{}", console::style(title).bold());
        for line in self.lines() {
            log::log!(level, "{line}");
        }
        log::log!(level, "");
    }
}

pub(crate) struct InfoPrinter {
    title: Cow<'static, str>,
    tree: Tree,
}

impl InfoPrinter {
    pub(crate) fn new(title: Cow<'static, str>) -> Self {
        Self {
            title,
            tree: Tree::default(),
        }
    }

    pub(crate) fn push_line(&mut self, line: Cow<'static, str>) {
        self.tree.blocks.push(vec![line]);
    }

    pub(crate) fn push_block(&mut self, block: Vec<Cow<'static, str>>) {
        self.tree.blocks.push(block);
    }

    pub(crate) fn display(self) {
        self.tree.log(Level::Info, &self.title);
    }

    #[cfg(test)]
    pub(crate) fn lines(&self) -> Vec<String> {
        self.tree.lines()
    }
}

pub(crate) trait Warn {
    fn warn(self);
}

impl Warn for &'static str {
    fn warn(self) {
        WARNINGS.lock().unwrap().blocks.push(vec![self.into()]);
    }
}

impl Warn for String {
    fn warn(self) {
        WARNINGS.lock().unwrap().blocks.push(vec![self.into()]);
    }
}

impl Warn for Vec<Cow<'static, str>> {
    fn warn(self) {
        WARNINGS.lock().unwrap().blocks.push(self);
    }
}

/// Print out any warnings that have been collected while arguments were
/// parsed, then forget them.
pub(crate) fn display_warnings() {
    let mut warnings = WARNINGS.lock().unwrap();
    log::debug!("Displaying warnings");
    if warnings.blocks.is_empty() {
        return;
    }
    warnings.log(Level::Warn, "Warnings");
    warnings.blocks.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_symbols() {
        let mut printer = InfoPrinter::new("Title".into());
        printer.push_line("first".into());
        printer.push_block(vec!["second".into(), "detail".into()]);
        printer.push_line("last".into());
        assert_eq!(
            printer.lines(),
            vec!["├ first", "├ second", "│ detail", "└ last"]
        );

        let mut printer = InfoPrinter::new("Title".into());
        printer.push_block(vec!["only".into(), "more".into()]);
        assert_eq!(printer.lines(), vec!["├ only", "│ more"]);
    }
}
