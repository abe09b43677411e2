//! Raspberry Pi images known to boot in the emulator.

use anyhow::{bail, Result};

use super::{Credentials, OperatingSystem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownOs {
    RaspberryPiLite,
    RaspberryPi,
    DietPi,
    HypriotOs,
    TinyCore,
    ArchLinuxArm,
    UbuntuServer,
    WebThingsGateway,
    BalenaOs,
    RiscOs,
}

pub const ALL: &[KnownOs] = &[
    KnownOs::RaspberryPiLite,
    KnownOs::RaspberryPi,
    KnownOs::DietPi,
    KnownOs::HypriotOs,
    KnownOs::TinyCore,
    KnownOs::ArchLinuxArm,
    KnownOs::UbuntuServer,
    KnownOs::WebThingsGateway,
    KnownOs::BalenaOs,
    KnownOs::RiscOs,
];

impl KnownOs {
    pub fn id(self) -> &'static str {
        match self {
            KnownOs::RaspberryPiLite => "raspberry-pi-lite",
            KnownOs::RaspberryPi => "raspberry-pi",
            KnownOs::DietPi => "dietpi",
            KnownOs::HypriotOs => "hypriot",
            KnownOs::TinyCore => "tinycore",
            KnownOs::ArchLinuxArm => "archlinux-arm",
            KnownOs::UbuntuServer => "ubuntu-server",
            KnownOs::WebThingsGateway => "webthings-gateway",
            KnownOs::BalenaOs => "balena",
            KnownOs::RiscOs => "riscos",
        }
    }

    pub fn from_id(id: &str) -> Result<Self> {
        let wanted = id.trim().to_ascii_lowercase();
        match ALL.iter().find(|os| os.id() == wanted) {
            Some(os) => Ok(*os),
            None => bail!(
                "unknown operating system '{}'; expected one of: {}",
                id,
                ALL.iter().map(|os| os.id()).collect::<Vec<_>>().join(", ")
            ),
        }
    }

    fn full_name(self) -> &'static str {
        match self {
            KnownOs::RaspberryPiLite => "Raspberry Pi OS Lite",
            KnownOs::RaspberryPi => "Raspberry Pi OS",
            KnownOs::DietPi => "Diet Pi",
            KnownOs::HypriotOs => "Hypriot OS",
            KnownOs::TinyCore => "Tiny Core",
            KnownOs::ArchLinuxArm => "Arch Linux ARM",
            KnownOs::UbuntuServer => "Ubuntu Server 20.10",
            KnownOs::WebThingsGateway => "WebThings Gateway for Raspberry Pi",
            KnownOs::BalenaOs => "balenaOS for Raspberry Pi (v1 and Zero)",
            KnownOs::RiscOs => "RISC OS",
        }
    }

    fn download_url(self) -> &'static str {
        match self {
            KnownOs::RaspberryPiLite => "https://downloads.raspberrypi.org/raspios_lite_armhf_latest",
            KnownOs::RaspberryPi => "https://downloads.raspberrypi.org/raspios_armhf_latest",
            KnownOs::DietPi => "https://dietpi.com/downloads/images/DietPi_RPi-ARMv6-Buster.7z",
            KnownOs::HypriotOs => "https://github.com/hypriot/image-builder-rpi/releases",
            KnownOs::TinyCore => "http://tinycorelinux.net/12.x/armv6/releases/RPi/piCore-12.0.zip",
            KnownOs::ArchLinuxArm => "http://os.archlinuxarm.org/os/ArchLinuxARM-rpi-latest.tar.gz",
            KnownOs::UbuntuServer => "https://cdimage.ubuntu.com/releases/20.10/release/ubuntu-20.10-preinstalled-server-armhf+raspi.img.xz",
            KnownOs::WebThingsGateway => "https://github.com/WebThingsIO/gateway/releases/download/0.12.0/gateway-0.12.0.img.zip",
            KnownOs::BalenaOs => "https://api.balena-cloud.com/download?deviceType=raspberry-pi&version=2.54.2+rev1.dev&fileType=.zip",
            KnownOs::RiscOs => "https://www.riscosopen.org/zipfiles/platform/raspberry-pi/BCM2835.5.24.zip",
        }
    }

    fn credentials(self) -> Credentials {
        match self {
            KnownOs::RaspberryPiLite | KnownOs::RaspberryPi | KnownOs::WebThingsGateway => {
                Credentials::new("pi", "raspberry")
            }
            KnownOs::DietPi => Credentials::new("root", "dietpi"),
            KnownOs::HypriotOs => Credentials::new("pirate", "hypriot"),
            KnownOs::TinyCore => Credentials::new("tc", "piCore"),
            KnownOs::ArchLinuxArm => Credentials::new("alarm", "alarm"),
            KnownOs::UbuntuServer => Credentials::new("ubuntu", "ubuntu"),
            KnownOs::BalenaOs | KnownOs::RiscOs => Credentials::default(),
        }
    }

    /// The full descriptor with default patterns.
    pub fn descriptor(self) -> OperatingSystem {
        let mut os = OperatingSystem::new(self.id(), self.full_name(), self.credentials());
        os.download_url = Some(self.download_url().to_string());
        if self == KnownOs::RiscOs {
            // RISC OS has no systemd emergency mode to detect
            os.patterns = os.patterns.without_dead_end();
        }
        os
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_round_trip() {
        for os in ALL {
            assert_eq!(KnownOs::from_id(os.id()).unwrap(), *os);
        }
    }

    #[test]
    fn test_from_id_is_case_insensitive() {
        assert_eq!(KnownOs::from_id(" DietPi ").unwrap(), KnownOs::DietPi);
    }

    #[test]
    fn test_unknown_id_lists_choices() {
        let err = KnownOs::from_id("windows").unwrap_err().to_string();
        assert!(err.contains("windows"));
        assert!(err.contains("raspberry-pi-lite"));
    }

    #[test]
    fn test_raspberry_pi_lite_descriptor() {
        let os = KnownOs::RaspberryPiLite.descriptor();
        assert_eq!(os.default_credentials, Credentials::new("pi", "raspberry"));
        assert_eq!(os.full_name, "Raspberry Pi OS Lite");
        assert!(os.patterns.dead_end.is_some());
    }

    #[test]
    fn test_riscos_has_no_dead_end() {
        let os = KnownOs::RiscOs.descriptor();
        assert!(os.patterns.dead_end.is_none());
        assert!(os.default_credentials.is_empty());
    }
}
