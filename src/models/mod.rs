//! 数据模型定义

/// 以字符串形式持久化的枚举（与数据库中的取值一致）
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? } default $def:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$def
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_uppercase().as_str() {
                    $( $text => Ok($name::$variant), )+
                    other => Err(format!("无效的 {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

pub mod backup;
pub mod portfolio;
pub mod price;
pub mod push;
pub mod recommendation;
pub mod response;
pub mod simulation;
pub mod user;

pub use backup::*;
pub use portfolio::*;
pub use price::*;
pub use push::*;
pub use recommendation::*;
pub use response::*;
pub use simulation::*;
pub use user::*;
