//! Choreography bytecode interpreter
//!
//! A choreography is a flat byte array of `(wait, opcode, operands...)`
//! records. The interpreter here is pure: it decodes one record at a time
//! and hands back the delay to observe and the action to perform. Timing,
//! LEDs, ears and sound belong to the caller.

pub mod dialect;
pub mod interpreter;
pub mod palette;

pub use dialect::{Dialect, Opcode};
pub use interpreter::{Action, Halt, Interpreter, Registers, Step};
pub use palette::{Palette, MIDI_LIST, PALETTES};

/// Optional 4-byte marker at the start of a program
pub const HEADER: [u8; 4] = [1, 1, 1, 1];

/// Opcode used by some programs as an explicit end marker
pub const END_MARKER: u8 = 255;

/// Reference of the live streaming pseudo-program
pub const STREAMING_URN: &str = "urn:x-chor:streaming";

/// Scheme of inline programs
pub const DATA_MTL_SCHEME: &str = "data:application/x-nabaztag-mtl-choreography";

/// Resource glob of the programs used by the streaming loop
pub const STREAMING_PROGRAMS: &str = "nabd/streaming/*.chor";

/// Derive the branch value used by `ifne` from a random byte
///
/// Yields 0..=29, slightly non-uniform, as the original firmware did.
pub fn taichi_random(byte: u8) -> u8 {
    ((byte as u16 * 30) >> 8) as u8
}

/// Strip the optional header marker
pub fn program_body(program: &[u8]) -> &[u8] {
    if program.len() >= HEADER.len() && program[..HEADER.len()] == HEADER {
        &program[HEADER.len()..]
    } else {
        program
    }
}

/// Parse the palette suffix of a streaming reference
///
/// `urn:x-chor:streaming` gives `Some(None)` (random palette),
/// `urn:x-chor:streaming;3` gives `Some(Some(3))`. Other references give
/// `None`.
pub fn parse_streaming_ref(reference: &str) -> Option<Option<usize>> {
    let rest = reference.strip_prefix(STREAMING_URN)?;
    if rest.is_empty() {
        return Some(None);
    }
    let n: usize = rest.strip_prefix(';')?.parse().ok()?;
    Some(Some(n & 7))
}
