//! Operation plans with the outputs they should produce from a 1600x1200 source

#![allow(dead_code)]

pub const SOURCE_WIDTH: u32 = 1600;
pub const SOURCE_HEIGHT: u32 = 1200;

/// Expected output of one operation in a plan.
#[derive(Debug, Clone)]
pub struct ExpectedOutput {
    pub width: u32,
    pub height: u32,
    pub extension: &'static str,
    pub quality: Option<u8>,
}

/// A job's operation list as submitted JSON, and what should come out.
#[derive(Debug, Clone)]
pub struct PlanFixture {
    pub name: &'static str,
    pub operations_json: &'static str,
    pub expected: &'static [ExpectedOutput],
}

pub const PLAN_FIXTURES: &[PlanFixture] = &[
    PlanFixture {
        name: "thumbnail",
        operations_json: r#"[{"kind": "resize", "width": 200, "height": 200, "format": "png"}]"#,
        expected: &[ExpectedOutput {
            width: 200,
            height: 200,
            extension: ".png",
            quality: None,
        }],
    },
    PlanFixture {
        name: "width only then webp, written as jpeg",
        operations_json: r#"[
            {"kind": "resize", "width": 400, "format": "jpeg", "quality": 75},
            {"kind": "format", "format": "webp"}
        ]"#,
        expected: &[
            ExpectedOutput {
                width: 400,
                height: 300,
                extension: ".jpg",
                quality: Some(75),
            },
            ExpectedOutput {
                width: 400,
                height: 300,
                extension: ".jpg",
                quality: Some(90),
            },
        ],
    },
    PlanFixture {
        name: "height only with unknown format",
        operations_json: r#"[{"kind": "resize", "height": 120, "format": "tiff"}]"#,
        expected: &[ExpectedOutput {
            width: 160,
            height: 120,
            extension: ".jpg",
            quality: Some(90),
        }],
    },
    PlanFixture {
        name: "unknown kind is skipped",
        operations_json: r#"[
            {"kind": "sharpen"},
            {"kind": "watermark", "watermark": "(c) 2024", "format": "png"},
            {"kind": "resize", "width": 800, "height": 600}
        ]"#,
        expected: &[
            ExpectedOutput {
                width: 1600,
                height: 1200,
                extension: ".png",
                quality: None,
            },
            ExpectedOutput {
                width: 800,
                height: 600,
                extension: ".jpg",
                quality: Some(90),
            },
        ],
    },
];
