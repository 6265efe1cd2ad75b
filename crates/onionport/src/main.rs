//! A SOCKS front end for an onion-routing client.
//!
//! See the library documentation for the command line and configuration.

fn main() {
    onionport::main();
}
