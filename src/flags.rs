use bitflags::bitflags;
use std::fmt;

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        const SYN = 0x01;
        const ACK = 0x02;
        const FIN = 0x04;
        const DATA = 0x08;
    }
}

impl PacketFlags {
    pub const SYN_ACK: Self = Self::SYN.union(Self::ACK);
    pub const FIN_DATA: Self = Self::FIN.union(Self::DATA);
    pub const FIN_ACK: Self = Self::FIN.union(Self::ACK);

    /// The protocol admits exactly six combinations; anything else is
    /// rejected at decode and never reaches dispatch.
    pub fn is_legal(&self) -> bool {
        [Self::SYN, Self::ACK, Self::DATA, Self::SYN_ACK, Self::FIN_DATA, Self::FIN_ACK]
            .contains(self)
    }
}

impl fmt::Display for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = vec![];

        if self.contains(PacketFlags::SYN) {
            names.push("SYN");
        }
        if self.contains(PacketFlags::ACK) {
            names.push("ACK");
        }
        if self.contains(PacketFlags::FIN) {
            names.push("FIN");
        }
        if self.contains(PacketFlags::DATA) {
            names.push("DATA");
        }

        if names.is_empty() {
            write!(f, "NONE {:#04x}", self.bits())
        } else {
            write!(f, "{} {:#04x}", names.join(" | "), self.bits())
        }
    }
}
