// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Framed byte stream shared by the broker and the client.
//!
//! - `Frame`: finds, checks and encodes delimiter terminated frames
//! - `Connection`: reads frames off the read half of a socket

pub use connection::{write_frame, Connection};
pub use frame::Frame;
mod connection;
mod frame;
