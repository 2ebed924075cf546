//! Accessor macro for little-endian fields at fixed offsets inside a sector.

macro_rules! define_field {
    ($name:ident, u8, $offset:expr) => {
        /// Get the value from the $name field.
        pub fn $name(&self) -> u8 {
            self.data[$offset]
        }
    };
    ($name:ident, u16, $offset:expr) => {
        /// Get the value from the $name field.
        pub fn $name(&self) -> u16 {
            <byteorder::LittleEndian as byteorder::ByteOrder>::read_u16(
                &self.data[$offset..$offset + 2],
            )
        }
    };
    ($name:ident, u32, $offset:expr) => {
        /// Get the value from the $name field.
        pub fn $name(&self) -> u32 {
            <byteorder::LittleEndian as byteorder::ByteOrder>::read_u32(
                &self.data[$offset..$offset + 4],
            )
        }
    };
}
