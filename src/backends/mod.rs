// SPDX-License-Identifier: GPL-3.0-only

//! Camera platform layer
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │           Scan Session Controller            │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │            Camera Session Manager            │
//! │  ┌─────────────┐    ┌──────────────────┐   │
//! │  │    V4L2     │    │  Virtual Camera  │   │
//! │  │ (/dev/video)│    │   (scripted)     │   │
//! │  └─────────────┘    └──────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod camera;
pub mod virtual_camera;
