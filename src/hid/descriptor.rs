//! Composite report descriptor: one digitizer contact per report (id 1) and
//! three boot keyboards (ids 2..4).

use super::{
    REPORT_ID_KEYBOARD1,
    REPORT_ID_KEYBOARD2,
    REPORT_ID_KEYBOARD3,
    REPORT_ID_TOUCH,
};

macro_rules! keyboard_collection {
    ($id:expr) => {
        [
            0x05, 0x01, // USAGE_PAGE (Generic Desktop)
            0x09, 0x06, // USAGE (Keyboard)
            0xA1, 0x01, // COLLECTION (Application)
            0x85, $id,  //   REPORT_ID
            0x05, 0x07, //   USAGE_PAGE (Keyboard)
            0x19, 0xE0, //   USAGE_MINIMUM (Left Control)
            0x29, 0xE7, //   USAGE_MAXIMUM (Right GUI)
            0x15, 0x00, //   LOGICAL_MINIMUM (0)
            0x25, 0x01, //   LOGICAL_MAXIMUM (1)
            0x75, 0x01, //   REPORT_SIZE (1)
            0x95, 0x08, //   REPORT_COUNT (8)
            0x81, 0x02, //   INPUT (Data,Var,Abs)
            0x75, 0x08, //   REPORT_SIZE (8)
            0x95, 0x01, //   REPORT_COUNT (1)
            0x81, 0x01, //   INPUT (Const)
            0x19, 0x00, //   USAGE_MINIMUM (0)
            0x29, 0xFF, //   USAGE_MAXIMUM (255)
            0x15, 0x00, //   LOGICAL_MINIMUM (0)
            0x26, 0xFF, 0x00, // LOGICAL_MAXIMUM (255)
            0x75, 0x08, //   REPORT_SIZE (8)
            0x95, 0x06, //   REPORT_COUNT (6)
            0x81, 0x00, //   INPUT (Data,Array,Abs)
            0xC0,       // END_COLLECTION
        ]
    };
}

const TOUCH: &[u8] = &[
    0x05, 0x0D,       // USAGE_PAGE (Digitizer)
    0x09, 0x04,       // USAGE (Touch Screen)
    0xA1, 0x01,       // COLLECTION (Application)
    0x85, REPORT_ID_TOUCH,
    0x09, 0x22,       //   USAGE (Finger)
    0xA1, 0x02,       //   COLLECTION (Logical)
    0x09, 0x42,       //     USAGE (Tip Switch)
    0x09, 0x47,       //     USAGE (Confidence)
    0x15, 0x00,       //     LOGICAL_MINIMUM (0)
    0x25, 0x01,       //     LOGICAL_MAXIMUM (1)
    0x75, 0x01,       //     REPORT_SIZE (1)
    0x95, 0x02,       //     REPORT_COUNT (2)
    0x81, 0x02,       //     INPUT (Data,Var,Abs)
    0x95, 0x06,       //     REPORT_COUNT (6)
    0x81, 0x03,       //     INPUT (Const,Var,Abs)
    0x09, 0x51,       //     USAGE (Contact Identifier)
    0x25, 0x09,       //     LOGICAL_MAXIMUM (9)
    0x75, 0x08,       //     REPORT_SIZE (8)
    0x95, 0x01,       //     REPORT_COUNT (1)
    0x81, 0x02,       //     INPUT (Data,Var,Abs)
    0x05, 0x01,       //     USAGE_PAGE (Generic Desktop)
    0x09, 0x30,       //     USAGE (X)
    0x09, 0x31,       //     USAGE (Y)
    0x26, 0xFF, 0x7F, //     LOGICAL_MAXIMUM (32767)
    0x75, 0x10,       //     REPORT_SIZE (16)
    0x95, 0x02,       //     REPORT_COUNT (2)
    0x81, 0x02,       //     INPUT (Data,Var,Abs)
    0xC0,             //   END_COLLECTION
    0x05, 0x0D,       //   USAGE_PAGE (Digitizer)
    0x09, 0x56,       //   USAGE (Scan Time)
    0x27, 0xFF, 0xFF, 0x00, 0x00, // LOGICAL_MAXIMUM (65535)
    0x75, 0x10,       //   REPORT_SIZE (16)
    0x95, 0x01,       //   REPORT_COUNT (1)
    0x81, 0x02,       //   INPUT (Data,Var,Abs)
    0x09, 0x54,       //   USAGE (Contact Count)
    0x25, 0x0A,       //   LOGICAL_MAXIMUM (10)
    0x75, 0x08,       //   REPORT_SIZE (8)
    0x81, 0x02,       //   INPUT (Data,Var,Abs)
    0xC0,             // END_COLLECTION
];

const KEYBOARD1: &[u8] = &keyboard_collection!(REPORT_ID_KEYBOARD1);
const KEYBOARD2: &[u8] = &keyboard_collection!(REPORT_ID_KEYBOARD2);
const KEYBOARD3: &[u8] = &keyboard_collection!(REPORT_ID_KEYBOARD3);

const fn concat() -> [u8; REPORT_DESCRIPTOR_LEN] {
    let parts: [&[u8]; 4] = [TOUCH, KEYBOARD1, KEYBOARD2, KEYBOARD3];
    let mut out = [0u8; REPORT_DESCRIPTOR_LEN];
    let mut pos = 0;
    let mut p = 0;
    while p < parts.len() {
        let part = parts[p];
        let mut i = 0;
        while i < part.len() {
            out[pos] = part[i];
            pos += 1;
            i += 1;
        }
        p += 1;
    }
    out
}

pub const REPORT_DESCRIPTOR_LEN: usize = TOUCH.len() + KEYBOARD1.len() + KEYBOARD2.len() + KEYBOARD3.len();

pub static REPORT_DESCRIPTOR: [u8; REPORT_DESCRIPTOR_LEN] = concat();
