//! 业务逻辑服务模块
//!
//! 封装数据访问与业务规则，处理器只负责参数解析与响应

pub mod ai_engine;          // AI 评估
pub mod alert_service;      // 每日提醒邮件
pub mod asset_service;      // 资产目录
pub mod audit;              // 审计日志
pub mod auth_service;       // 登录与会话
pub mod backup_service;     // JSON 备份
pub mod common;
pub mod portfolio_service;  // 组合与流水
pub mod price_engine;       // 模拟行情
pub mod price_service;      // 历史价格
pub mod push_service;       // Web Push 订阅
pub mod reco_engine;        // 投资机会
pub mod simulator_service;  // 模拟交易
pub mod stats_engine;       // 统计分析
