//! Generate test vectors for TypeScript front-end interop testing.
//!
//! Run with: cargo run --package protocol --example test_vectors

use protocol::{ClientMessage, DataEncoding, ServerMessage};

fn main() {
    // Test vector 1: start with explicit size
    print_client_vector(
        "start_default",
        &ClientMessage::Start {
            cols: Some(80),
            rows: Some(24),
            encoding: DataEncoding::Utf8,
        },
    );

    // Test vector 2: input carrying control characters
    print_client_vector(
        "input_ctrl_c",
        &ClientMessage::Input {
            id: "sess-1".to_string(),
            data: "\u{3}".to_string(),
            encoding: DataEncoding::Utf8,
        },
    );

    // Test vector 3: ready
    print_server_vector(
        "ready",
        &ServerMessage::Ready {
            id: "sess-1".to_string(),
            pid: Some(4242),
        },
    );

    // Test vector 4: base64 output
    print_server_vector(
        "output_base64",
        &ServerMessage::Output {
            id: "sess-1".to_string(),
            data: DataEncoding::Base64.encode(b"\x1b[32mok\x1b[0m"),
            encoding: DataEncoding::Base64,
        },
    );

    // Test vector 5: exit without a code
    print_server_vector(
        "exit_unknown_code",
        &ServerMessage::Exit {
            id: "sess-1".to_string(),
            code: None,
        },
    );

    // Test vector 6: error
    print_server_vector(
        "error",
        &ServerMessage::error("failed to start terminal: shell not found: /bin/nope"),
    );
}

fn print_client_vector(name: &str, message: &ClientMessage) {
    let json = message.to_json().expect("serialization failed");
    println!("export const {} = {:?};", name, json);
}

fn print_server_vector(name: &str, message: &ServerMessage) {
    let json = message.to_json().expect("serialization failed");
    println!("export const {} = {:?};", name, json);
}
