// Copyright 2021 Datafuse Labs
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

//! Sweep candidate scanning: which old versions of a table can be reclaimed.

pub mod candidate;
pub mod request;
pub mod scanner;


pub use self::candidate::CandidateCellForSweeping;
pub use self::candidate::ScanStats;
pub use self::request::CandidateCellForSweepingRequest;
pub use self::request::CandidateCellForSweepingRequestBuilder;
pub use self::request::SweepPolicy;
pub use self::scanner::CandidateBatchStream;
pub use self::scanner::SweepCandidateScanner;
