//! Built-in palettes and note samples

use crate::traits::Rgb;

/// Eight palette slots; slot 7 is always black
pub type Palette = [Rgb; 8];

const fn rgb(r: u8, g: u8, b: u8) -> Rgb {
    Rgb::new(r, g, b)
}

const BLACK: Rgb = Rgb::OFF;

/// The seven palettes selectable by streaming references and choreographies
pub const PALETTES: [Palette; 7] = [
    // acidulee
    [
        rgb(255, 12, 0),
        rgb(0, 255, 31),
        rgb(255, 242, 0),
        rgb(0, 3, 255),
        rgb(255, 242, 0),
        rgb(0, 255, 31),
        rgb(255, 12, 0),
        BLACK,
    ],
    // violet
    [
        rgb(95, 0, 255),
        rgb(127, 0, 255),
        rgb(146, 0, 255),
        rgb(191, 0, 255),
        rgb(223, 0, 255),
        rgb(255, 0, 223),
        rgb(255, 0, 146),
        BLACK,
    ],
    // lumiere
    [
        Rgb::WHITE,
        Rgb::WHITE,
        Rgb::WHITE,
        Rgb::WHITE,
        Rgb::WHITE,
        Rgb::WHITE,
        Rgb::WHITE,
        BLACK,
    ],
    // emotion
    [
        rgb(254, 128, 2),
        rgb(243, 68, 2),
        rgb(216, 6, 7),
        rgb(200, 4, 13),
        rgb(170, 0, 24),
        rgb(218, 5, 96),
        rgb(207, 6, 138),
        BLACK,
    ],
    // oriental
    [
        rgb(20, 155, 18),
        rgb(255, 0, 0),
        rgb(252, 243, 5),
        rgb(20, 155, 18),
        rgb(252, 243, 5),
        rgb(255, 0, 0),
        rgb(20, 155, 18),
        BLACK,
    ],
    // pastel
    [
        rgb(252, 238, 71),
        rgb(206, 59, 69),
        rgb(85, 68, 212),
        rgb(78, 167, 82),
        rgb(243, 75, 153),
        rgb(151, 71, 196),
        Rgb::WHITE,
        BLACK,
    ],
    // nature
    [
        rgb(204, 255, 102),
        rgb(204, 255, 0),
        rgb(153, 255, 0),
        rgb(51, 204, 0),
        rgb(0, 153, 51),
        rgb(0, 136, 0),
        rgb(0, 102, 51),
        BLACK,
    ],
];

/// Look up a palette, wrapping out-of-range indices
pub fn palette(index: usize) -> &'static Palette {
    &PALETTES[index % PALETTES.len()]
}

/// Short note samples played by `randmidi`
pub const MIDI_LIST: [&str; 24] = [
    "choreographies/1noteA4.mp3",
    "choreographies/1noteB5.mp3",
    "choreographies/1noteBb4.mp3",
    "choreographies/1noteC5.mp3",
    "choreographies/1noteE4.mp3",
    "choreographies/1noteF4.mp3",
    "choreographies/1noteF5.mp3",
    "choreographies/1noteG5.mp3",
    "choreographies/2notesC6C4.mp3",
    "choreographies/2notesC6F5.mp3",
    "choreographies/2notesD4A5.mp3",
    "choreographies/2notesD4G4.mp3",
    "choreographies/2notesD5G4.mp3",
    "choreographies/2notesE5A5.mp3",
    "choreographies/2notesE5C6.mp3",
    "choreographies/2notesE5E4.mp3",
    "choreographies/3notesA4G5G5.mp3",
    "choreographies/3notesB5A5F5.mp3",
    "choreographies/3notesB5D5C6.mp3",
    "choreographies/3notesD4E4G4.mp3",
    "choreographies/3notesE5A5C6.mp3",
    "choreographies/3notesE5C6D5.mp3",
    "choreographies/3notesE5D5A5.mp3",
    "choreographies/3notesF5C6G5.mp3",
];
