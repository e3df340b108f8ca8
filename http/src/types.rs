/// HTTP 代理配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    /// 代理主机
    pub host: String,
    /// 代理端口
    pub port: u16,
    /// 代理用户名，无认证时为空
    pub username: String,
    /// 代理密码
    pub password: String,
}

impl Proxy {
    /// 创建无认证的代理配置
    #[inline]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
        }
    }

    /// 创建带认证的代理配置
    #[inline]
    pub fn new_with_credentials(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }
}

/// 重定向策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectPolicy {
    /// 拒绝任何重定向
    Deny,

    /// 拒绝从 https 降级到 http 的重定向
    DenyDowngrade,

    /// 允许重定向
    #[default]
    Allow,
}

/// 自签名证书策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfSigned {
    /// 拒绝自签名证书
    #[default]
    Denied,

    /// 允许自签名证书，主机名校验和其他证书链错误仍然生效
    Permitted,
}
