//! HDA codec layout table used to pick an AppleALC `layout-id`.

use crate::models::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLayouts {
    /// Codec vendor-device id, `10ec-0887` style.
    pub codec_id: &'static str,
    pub name: &'static str,
    /// Every layout AppleALC ships for this codec.
    pub layouts: &'static [u8],
    /// Layouts known to suit desktop boards, best first.
    pub desktop: &'static [u8],
    /// Layouts known to suit laptops, best first.
    pub laptop: &'static [u8],
}

pub static CODEC_LAYOUTS: &[CodecLayouts] = &[
    CodecLayouts {
        codec_id: "10ec-0887",
        name: "ALC887",
        layouts: &[1, 2, 3, 5, 7, 11, 12, 13, 17, 18, 20, 33, 40, 50, 52, 53, 87, 99, 100],
        desktop: &[1, 11, 12, 13],
        laptop: &[],
    },
    CodecLayouts {
        codec_id: "10ec-0892",
        name: "ALC892",
        layouts: &[1, 2, 3, 4, 5, 7, 12, 15, 16, 17, 18, 20, 22, 23, 28, 31, 90, 92, 97, 98, 99, 100],
        desktop: &[1, 7, 12],
        laptop: &[3, 31],
    },
    CodecLayouts {
        codec_id: "10ec-0897",
        name: "ALC897",
        layouts: &[11, 12, 13, 21, 23, 66, 69, 77, 98, 99],
        desktop: &[11, 12, 13],
        laptop: &[21, 66],
    },
    CodecLayouts {
        codec_id: "10ec-1220",
        name: "ALC1220",
        layouts: &[1, 2, 3, 5, 7, 11, 13, 15, 16, 21, 27, 28, 29, 30, 34, 35, 99, 100],
        desktop: &[1, 7, 11],
        laptop: &[21, 27],
    },
    CodecLayouts {
        codec_id: "10ec-0255",
        name: "ALC255",
        layouts: &[3, 11, 13, 15, 17, 18, 20, 21, 22, 27, 28, 29, 30, 31, 37, 71, 86, 99, 100],
        desktop: &[],
        laptop: &[3, 11, 13, 17],
    },
    CodecLayouts {
        codec_id: "10ec-0256",
        name: "ALC256",
        layouts: &[5, 11, 13, 14, 17, 19, 20, 21, 22, 23, 24, 28, 33, 38, 45, 56, 57, 66, 67, 68, 69, 70, 76, 77, 88, 95, 97, 99],
        desktop: &[],
        laptop: &[11, 13, 21, 56],
    },
    CodecLayouts {
        codec_id: "10ec-0236",
        name: "ALC236",
        layouts: &[3, 5, 11, 13, 14, 15, 16, 17, 18, 19, 54, 99],
        desktop: &[],
        laptop: &[3, 11, 13, 15],
    },
    CodecLayouts {
        codec_id: "10ec-0269",
        name: "ALC269",
        layouts: &[1, 3, 5, 6, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 27, 28, 29, 30, 31, 32, 33, 35, 44, 45, 47, 55, 58, 66, 88, 93, 99, 100],
        desktop: &[1, 3],
        laptop: &[3, 11, 13, 28],
    },
    CodecLayouts {
        codec_id: "10ec-0285",
        name: "ALC285",
        layouts: &[11, 21, 31, 52, 61, 66, 71, 88],
        desktop: &[],
        laptop: &[11, 21, 31],
    },
    CodecLayouts {
        codec_id: "10ec-0289",
        name: "ALC289",
        layouts: &[11, 12, 13, 23, 87, 93, 99],
        desktop: &[],
        laptop: &[11, 13, 23],
    },
    CodecLayouts {
        codec_id: "10ec-0295",
        name: "ALC295",
        layouts: &[1, 3, 11, 12, 13, 14, 15, 21, 22, 23, 24, 28, 33, 77, 99],
        desktop: &[],
        laptop: &[3, 13, 14, 28],
    },
];

pub fn lookup(codec_id: &str) -> Option<&'static CodecLayouts> {
    CODEC_LAYOUTS.iter().find(|c| c.codec_id.eq_ignore_ascii_case(codec_id))
}

/// Layout candidates for a codec on a platform, best first.
///
/// Uses the platform's preferred list when one exists, otherwise every
/// layout the codec has.
pub fn candidates(codec: &CodecLayouts, platform: Platform) -> &'static [u8] {
    let preferred = match platform {
        Platform::Desktop => codec.desktop,
        Platform::Laptop => codec.laptop,
    };
    if preferred.is_empty() {
        codec.layouts
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_layouts_are_shipped_layouts() {
        for codec in CODEC_LAYOUTS {
            for id in codec.desktop.iter().chain(codec.laptop) {
                assert!(codec.layouts.contains(id), "{} layout {}", codec.name, id);
            }
        }
    }

    #[test]
    fn test_candidates_fall_back_to_all_layouts() {
        let alc255 = lookup("10EC-0255").unwrap();
        assert_eq!(candidates(alc255, Platform::Desktop), alc255.layouts);
        assert_eq!(candidates(alc255, Platform::Laptop), &[3, 11, 13, 17]);
    }
}
