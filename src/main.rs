// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use clap::Parser;

fn main() {
    // Run distcal, only returning an exit code of 1 if there was an error.
    if let Err(e) = distcal::Distcal::parse().run() {
        // Use the logger, so that error messages are formatted the same way
        // as everything else. If the logger wasn't set up, fall back to
        // stderr.
        if log::log_enabled!(log::Level::Error) {
            log::error!("{e}");
        } else {
            eprintln!("Error: {e}");
        }
        std::process::exit(1);
    }
}
