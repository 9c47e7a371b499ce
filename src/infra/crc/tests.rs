use super::*;

const CHECK_INPUT: &[u8] = b"123456789";

#[test]
fn crc8_check_value() {
    assert_eq!(crc8(CHECK_INPUT), 0xA1);
}

#[test]
fn crc16_check_value() {
    assert_eq!(crc16(CHECK_INPUT), 0x6F91);
}

#[test]
fn crc32_check_value() {
    assert_eq!(crc32(CHECK_INPUT), 0xCBF4_3926);
}

#[test]
fn field_sizes() {
    assert_eq!(CrcMode::Off.field_size(), 0);
    assert_eq!(CrcMode::Crc8.field_size(), 1);
    assert_eq!(CrcMode::Crc16.field_size(), 2);
    assert_eq!(CrcMode::Crc32.field_size(), 4);
}

#[test]
fn compute_matches_width_functions() {
    assert_eq!(CrcMode::Crc8.compute(CHECK_INPUT), crc8(CHECK_INPUT) as u32);
    assert_eq!(CrcMode::Crc16.compute(CHECK_INPUT), crc16(CHECK_INPUT) as u32);
    assert_eq!(CrcMode::Crc32.compute(CHECK_INPUT), crc32(CHECK_INPUT));
    assert_eq!(CrcMode::Off.compute(CHECK_INPUT), 0);
}

#[test]
fn empty_input() {
    assert_eq!(crc8(&[]), 0x00);
    assert_eq!(crc16(&[]), 0xFFFF);
    assert_eq!(crc32(&[]), 0x0000_0000);
}
