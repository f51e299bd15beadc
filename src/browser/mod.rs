// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

pub mod driver;
pub mod session;

pub use driver::{BrowserHandle, CdpLauncher, EngineLauncher, PageHandle};
pub use session::{PageLease, SessionManager, StorageState};
